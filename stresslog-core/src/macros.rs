//! The `stress_log!` call-site macro and argument conversion.

/// Conversion of a logged value to its raw argument word.
///
/// Signed integers are sign-extended, floats are stored as the bits of an
/// `f64`, pointers as their address.
pub trait StressArg {
    /// The argument word.
    fn to_word(&self) -> u64;
}

macro_rules! unsigned_arg {
    ($($t:ty),*) => {$(
        impl StressArg for $t {
            #[inline]
            fn to_word(&self) -> u64 {
                *self as u64
            }
        }
    )*};
}

macro_rules! signed_arg {
    ($($t:ty),*) => {$(
        impl StressArg for $t {
            #[inline]
            fn to_word(&self) -> u64 {
                *self as i64 as u64
            }
        }
    )*};
}

unsigned_arg!(u8, u16, u32, u64, usize);
signed_arg!(i8, i16, i32, i64, isize);

impl StressArg for bool {
    #[inline]
    fn to_word(&self) -> u64 {
        u64::from(*self)
    }
}

impl StressArg for char {
    #[inline]
    fn to_word(&self) -> u64 {
        u64::from(u32::from(*self))
    }
}

impl StressArg for f64 {
    #[inline]
    fn to_word(&self) -> u64 {
        self.to_bits()
    }
}

impl StressArg for f32 {
    #[inline]
    fn to_word(&self) -> u64 {
        f64::from(*self).to_bits()
    }
}

impl<T: ?Sized> StressArg for *const T {
    #[inline]
    fn to_word(&self) -> u64 {
        self.cast::<()>() as usize as u64
    }
}

impl<T: ?Sized> StressArg for *mut T {
    #[inline]
    fn to_word(&self) -> u64 {
        self.cast::<()>() as usize as u64
    }
}

impl<T: StressArg + ?Sized> StressArg for &T {
    #[inline]
    fn to_word(&self) -> u64 {
        (**self).to_word()
    }
}

/// Log a message if the facility and level are enabled.
///
/// The format offset is cached per call site, so after the first write the
/// call costs a mask check, a timestamp and the record stores.
///
/// ```
/// use stresslog_core::{StressLog, StressLogConfig, stress_log};
/// use stresslog_core::facility::{LF_GC, LL_INFO10};
///
/// let log = StressLog::initialize(StressLogConfig::default()).unwrap();
/// stress_log!(log, LF_GC, LL_INFO10, "promoted %p to gen %d\n", 0x1000usize, 2);
/// ```
#[macro_export]
macro_rules! stress_log {
    ($log:expr, $facility:expr, $level:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {{
        static SITE: $crate::FormatSite = $crate::FormatSite::new();
        let log: &$crate::StressLog = &$log;
        let facility: u32 = $facility;
        if log.log_on(facility, $level) {
            log.log_at(
                &SITE,
                facility,
                $fmt,
                &[$($crate::StressArg::to_word(&$arg)),*],
            );
        }
    }};
}
