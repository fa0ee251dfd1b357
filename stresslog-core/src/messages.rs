//! Well-known messages.
//!
//! These formats are registered as module 0 of every store. The decoder
//! recognizes them by content to learn thread roles and GC boundaries, so
//! their text is part of the store format.

use crate::StressLog;
use crate::facility::{LF_ALWAYS, LF_GC, LF_GCALLOC, LF_GCROOTS, LL_ALWAYS, LL_INFO10, LL_INFO1000};

/// Start of a GC: index, requested generation, collect-classes flag.
pub const GC_START: &str =
    "{ =========== BEGINGC %d, (requested generation = %lu, collect_classes = %lu) ==========\n";

/// End of a GC: index, generation, collect-classes flag.
pub const GC_END: &str =
    "========== ENDGC %d (gen = %lu, collect_classes = %lu) ===========}\n";

/// A root was relocated: root address, old value, new value, method table.
pub const GC_ROOT: &str = "    GC Root %p RELOCATED %p -> %p  MT = %pT\n";

/// A root was promoted: root address, object, method table.
pub const GC_ROOT_PROMOTE: &str = "    IGCHeap::Promote: Promote GC Root *%p = %p MT = %pT\n";

/// A plug moved during compaction: start, end, distance moved down.
pub const GC_PLUG_MOVE: &str =
    "GC_HEAP RELOCATING Objects in heap within range [%p %p) by -0x%x bytes\n";

/// A thread switched tasks.
pub const TASK_SWITCH: &str = "StressLog TaskSwitch Marker\n";

/// A server GC thread for heap `%d` is about to wait.
pub const GC_THREAD_WAITING: &str = "%d gc thread waiting...";

/// A server GC thread for heap `%d` woke up.
pub const GC_THREAD_WOKE: &str = "%d gc thread woke up";

/// A background GC thread for heap `%d` is about to wait.
pub const BGC_THREAD_WAITING: &str = "%d BGC thread waiting...";

/// A background GC thread for heap `%d` woke up.
pub const BGC_THREAD_WOKE: &str = "%d BGC thread woke up";

/// The formats of module 0, in registration order.
pub const WELL_KNOWN: [&str; 10] = [
    GC_START,
    GC_END,
    GC_ROOT,
    GC_ROOT_PROMOTE,
    GC_PLUG_MOVE,
    TASK_SWITCH,
    GC_THREAD_WAITING,
    GC_THREAD_WOKE,
    BGC_THREAD_WAITING,
    BGC_THREAD_WOKE,
];

const GC_MARKER_FACILITY: u32 = LF_GCROOTS | LF_GC | LF_GCALLOC;

impl StressLog {
    /// Log the start of GC number `index`.
    pub fn gc_start(&self, index: u64, generation: u64, collect_classes: bool) {
        self.log_msg(
            LL_INFO10,
            GC_MARKER_FACILITY,
            GC_START,
            &[index, generation, collect_classes as u64],
        );
    }

    /// Log the end of GC number `index`.
    pub fn gc_end(&self, index: u64, generation: u64, collect_classes: bool) {
        self.log_msg(
            LL_INFO10,
            GC_MARKER_FACILITY,
            GC_END,
            &[index, generation, collect_classes as u64],
        );
    }

    /// Log a root relocation.
    pub fn gc_root(&self, root: u64, old: u64, new: u64, method_table: u64) {
        self.log_msg(
            LL_INFO1000,
            LF_GC | LF_GCROOTS,
            GC_ROOT,
            &[root, old, new, method_table],
        );
    }

    /// Log a root promotion.
    pub fn gc_root_promote(&self, root: u64, object: u64, method_table: u64) {
        self.log_msg(
            LL_INFO1000,
            LF_GC | LF_GCROOTS,
            GC_ROOT_PROMOTE,
            &[root, object, method_table],
        );
    }

    /// Log that `[start, end)` moved down by `distance` bytes.
    pub fn gc_plug_move(&self, start: u64, end: u64, distance: u64) {
        self.log_msg(LL_INFO1000, LF_GC, GC_PLUG_MOVE, &[start, end, distance]);
    }

    /// Log a task switch on the calling thread.
    pub fn task_switch(&self) {
        self.log_msg(LL_ALWAYS, LF_ALWAYS, TASK_SWITCH, &[]);
    }

    /// Log that the server GC thread for `heap` is waiting.
    pub fn gc_thread_waiting(&self, heap: u64) {
        self.log_msg(LL_INFO10, LF_GC, GC_THREAD_WAITING, &[heap]);
    }

    /// Log that the server GC thread for `heap` woke up.
    pub fn gc_thread_woke(&self, heap: u64) {
        self.log_msg(LL_INFO10, LF_GC, GC_THREAD_WOKE, &[heap]);
    }

    /// Log that the background GC thread for `heap` is waiting.
    pub fn bgc_thread_waiting(&self, heap: u64) {
        self.log_msg(LL_INFO10, LF_GC, BGC_THREAD_WAITING, &[heap]);
    }

    /// Log that the background GC thread for `heap` woke up.
    pub fn bgc_thread_woke(&self, heap: u64) {
        self.log_msg(LL_INFO10, LF_GC, BGC_THREAD_WOKE, &[heap]);
    }
}
