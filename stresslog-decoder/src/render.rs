//! Rendering of decoded messages.
//!
//! Format strings use the printf conventions of the runtime: flags, width,
//! precision and length modifiers, with `%s` arguments being offsets of
//! strings in the store's image and `%p` optionally followed by a letter
//! that says what the pointer is (`%pT` a type handle, `%pM` a method,
//! `%pV` a vtable, `%pK` a code address). Naming those pointers needs the
//! runtime's metadata and is left to a [`SymbolResolver`] supplied by the
//! host tool.

use crate::error::Result;
use crate::pipeline::{DecodeReport, Message};
use serde::Serialize;
use std::io::Write;
use stresslog_core::{Facility, RecordView, StoreImage};

/// What a `%p` argument points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PointerKind {
    /// Plain `%p`.
    Plain,
    /// `%pT`: a type handle.
    TypeHandle,
    /// `%pM`: a method descriptor.
    Method,
    /// `%pV`: a vtable.
    VTable,
    /// `%pK`: a code address.
    CodeAddress,
}

impl PointerKind {
    fn from_suffix(c: char) -> Option<Self> {
        match c {
            'T' => Some(Self::TypeHandle),
            'M' => Some(Self::Method),
            'V' => Some(Self::VTable),
            'K' => Some(Self::CodeAddress),
            _ => None,
        }
    }
}

/// Names pointers found in `%p` arguments.
pub trait SymbolResolver: Send + Sync {
    /// A name for `address`, or `None` to print the bare pointer.
    fn resolve(&self, kind: PointerKind, address: u64) -> Option<String>;
}

/// Resolver that knows no symbols.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl SymbolResolver for NoSymbols {
    fn resolve(&self, _kind: PointerKind, _address: u64) -> Option<String> {
        None
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One aligned text line per message.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

#[derive(Debug, Default)]
struct Directive {
    left: bool,
    plus: bool,
    space: bool,
    alt: bool,
    zero: bool,
    width: Option<usize>,
    precision: Option<usize>,
    bits: u32,
}

/// Renders messages of one store image.
pub struct Renderer<'i, 'a> {
    image: &'i StoreImage<'a>,
    resolver: &'i dyn SymbolResolver,
    role_tags: bool,
}

impl<'i, 'a> Renderer<'i, 'a> {
    /// A renderer without symbol resolution.
    pub fn new(image: &'i StoreImage<'a>) -> Self {
        Self {
            image,
            resolver: &NoSymbols,
            role_tags: false,
        }
    }

    /// Resolve `%p` suffixes with `resolver`.
    pub fn with_resolver(mut self, resolver: &'i dyn SymbolResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Print `GC3`/`BG3` instead of the thread id where the role is known.
    pub fn with_role_tags(mut self, enabled: bool) -> Self {
        self.role_tags = enabled;
        self
    }

    /// Expand a record's format string with its arguments.
    pub fn message_text(&self, record: &RecordView<'_>) -> String {
        match self.image.format_str(record.format_offset()) {
            Some(format) => {
                let args: Vec<u64> = record.args().collect();
                self.format(format, &args)
            }
            None => format!(
                "<unresolvable format {:#x}> args: {:x?}",
                record.format_offset(),
                record.args().collect::<Vec<_>>()
            ),
        }
    }

    /// Expand `format` with raw argument words.
    pub fn format(&self, format: &str, args: &[u64]) -> String {
        let mut out = String::with_capacity(format.len() + 16 * args.len());
        let mut args = args.iter().copied();
        let mut chars = format.char_indices().peekable();

        while let Some((start, c)) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }

            let mut directive = Directive {
                bits: 32,
                ..Directive::default()
            };
            while let Some(&(_, flag)) = chars.peek() {
                match flag {
                    '-' => directive.left = true,
                    '+' => directive.plus = true,
                    ' ' => directive.space = true,
                    '#' => directive.alt = true,
                    '0' => directive.zero = true,
                    _ => break,
                }
                chars.next();
            }
            if chars.peek().is_some_and(|&(_, c)| c == '*') {
                chars.next();
                // A C int; negative means left-justified.
                let width = args.next().unwrap_or(0) as i32;
                directive.left |= width < 0;
                directive.width = Some(clamp_field(width.unsigned_abs() as usize));
            } else {
                directive.width = digits(&mut chars).map(clamp_field);
            }
            if chars.peek().is_some_and(|&(_, c)| c == '.') {
                chars.next();
                if chars.peek().is_some_and(|&(_, c)| c == '*') {
                    chars.next();
                    // Negative means no precision.
                    let precision = args.next().unwrap_or(0) as i32;
                    directive.precision =
                        usize::try_from(precision).ok().map(clamp_field);
                } else {
                    directive.precision = Some(clamp_field(digits(&mut chars).unwrap_or(0)));
                }
            }
            directive.bits = length_modifier(format, &mut chars);

            let Some((end, conversion)) = chars.next() else {
                out.push_str(&format[start..]);
                break;
            };
            let text = match conversion {
                '%' => "%".to_string(),
                'd' | 'i' => signed(&directive, args.next()),
                'u' => unsigned(&directive, args.next(), 10, false),
                'x' => unsigned(&directive, args.next(), 16, false),
                'X' => unsigned(&directive, args.next(), 16, true),
                'o' => unsigned(&directive, args.next(), 8, false),
                'c' => args
                    .next()
                    .and_then(|w| char::from_u32(w as u32))
                    .map(String::from)
                    .unwrap_or_else(|| "(missing)".to_string()),
                's' | 'S' => self.string_arg(args.next()),
                'p' => {
                    let kind = chars
                        .peek()
                        .and_then(|&(_, c)| PointerKind::from_suffix(c));
                    if kind.is_some() {
                        chars.next();
                    }
                    self.pointer(kind.unwrap_or(PointerKind::Plain), args.next())
                }
                'f' | 'F' | 'e' | 'E' | 'g' | 'G' => float(&directive, conversion, args.next()),
                _ => {
                    out.push_str(&format[start..end + conversion.len_utf8()]);
                    continue;
                }
            };
            pad(&mut out, &directive, &text, conversion);
        }
        out
    }

    fn string_arg(&self, arg: Option<u64>) -> String {
        match arg {
            None => "(missing)".to_string(),
            Some(0) => "(null)".to_string(),
            Some(offset) => u32::try_from(offset)
                .ok()
                .and_then(|offset| self.image.format_str(offset))
                .map(str::to_string)
                .unwrap_or_else(|| format!("<string {offset:#x}>")),
        }
    }

    fn pointer(&self, kind: PointerKind, arg: Option<u64>) -> String {
        let Some(address) = arg else {
            return "(missing)".to_string();
        };
        let text = format!("{address:016X}");
        match self.resolver.resolve(kind, address) {
            Some(name) => format!("{text} ({name})"),
            None => text,
        }
    }

    /// Thread label: role tag if enabled and known, otherwise the hex id.
    pub fn thread_tag(&self, message: &Message<'_>) -> String {
        match message.role {
            Some(role) if self.role_tags => role.to_string(),
            _ => format!("{:x}", message.thread_id),
        }
    }

    /// Facility column: the facility names, or the GC dprint level.
    pub fn facility_tag(&self, record: &RecordView<'_>) -> String {
        let facility = Facility::new(record.facility());
        match facility.dprint_level() {
            Some(level) => format!("`GC`:{level}"),
            None => facility.to_string(),
        }
    }

    /// One text line, without the trailing newline.
    pub fn text_line(&self, message: &Message<'_>) -> String {
        let record = &message.record;
        let text = self.message_text(record);
        format!(
            "{:>8} {:>14.9} : {:<20} {}",
            self.thread_tag(message),
            self.image.relative_seconds(record.timestamp()),
            self.facility_tag(record),
            text.trim_end_matches(['\n', '\r'])
        )
    }

    /// One JSON object.
    pub fn json_line(&self, message: &Message<'_>) -> Result<String> {
        let record = &message.record;
        let facility = Facility::new(record.facility());
        let text = self.message_text(record);
        let json = JsonMessage {
            thread_id: message.thread_id,
            role: message.role.map(|r| r.to_string()),
            seconds: self.image.relative_seconds(record.timestamp()),
            timestamp: record.timestamp(),
            facility: facility.raw(),
            facility_names: facility.names(),
            dprint_level: facility.dprint_level(),
            format: self.image.format_str(record.format_offset()),
            message: text.trim_end_matches(['\n', '\r']),
            args: record.args().collect(),
        };
        Ok(serde_json::to_string(&json)?)
    }

    /// Write a whole report: the earliest-message section first when
    /// present, then the messages.
    pub fn write_report(
        &self,
        out: &mut dyn Write,
        report: &DecodeReport<'_>,
        format: OutputFormat,
        ascending: bool,
    ) -> Result<()> {
        let line = |message: &Message<'_>| -> Result<String> {
            match format {
                OutputFormat::Text => Ok(self.text_line(message)),
                OutputFormat::Json => self.json_line(message),
            }
        };

        if !report.earliest.is_empty() {
            if format == OutputFormat::Text {
                writeln!(out, "Earliest retained messages:")?;
            }
            for message in &report.earliest {
                writeln!(out, "{}", line(message)?)?;
            }
            if format == OutputFormat::Text {
                writeln!(out, "{}", "-".repeat(72))?;
            }
        }

        let mut write_one = |message: &Message<'_>| -> Result<()> {
            writeln!(out, "{}", line(message)?)?;
            Ok(())
        };
        if ascending {
            report.messages.iter().rev().try_for_each(&mut write_one)?;
        } else {
            report.messages.iter().try_for_each(&mut write_one)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonMessage<'m> {
    thread_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    seconds: f64,
    timestamp: u64,
    facility: u32,
    facility_names: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dprint_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'m str>,
    message: &'m str,
    args: Vec<u64>,
}

/// Widths and precisions beyond this are rendered as this.
const MAX_FIELD: usize = 512;

fn clamp_field(value: usize) -> usize {
    value.min(MAX_FIELD)
}

fn digits(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> Option<usize> {
    let mut value: Option<usize> = None;
    while let Some(&(_, c)) = chars.peek() {
        let Some(d) = c.to_digit(10) else {
            break;
        };
        value = Some(value.unwrap_or(0).saturating_mul(10).saturating_add(d as usize));
        chars.next();
    }
    value
}

/// Consume a length modifier and return the argument width in bits.
fn length_modifier(format: &str, chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> u32 {
    let Some(&(at, c)) = chars.peek() else {
        return 32;
    };
    let rest = &format[at..];
    let (bits, len) = if rest.starts_with("I64") {
        (64, 3)
    } else if rest.starts_with("I32") {
        (32, 3)
    } else if rest.starts_with("hh") {
        (8, 2)
    } else if rest.starts_with("ll") {
        (64, 2)
    } else {
        match c {
            'h' => (16, 1),
            'l' | 'z' | 'j' | 't' | 'L' | 'I' => (64, 1),
            _ => (32, 0),
        }
    };
    for _ in 0..len {
        chars.next();
    }
    bits
}

fn signed(directive: &Directive, arg: Option<u64>) -> String {
    let Some(word) = arg else {
        return "(missing)".to_string();
    };
    let value: i64 = match directive.bits {
        8 => word as i8 as i64,
        16 => word as i16 as i64,
        32 => word as i32 as i64,
        _ => word as i64,
    };
    let mut digits = value.unsigned_abs().to_string();
    if let Some(precision) = directive.precision {
        if digits.len() < precision {
            digits = format!("{}{digits}", "0".repeat(precision - digits.len()));
        }
    }
    let sign = if value < 0 {
        "-"
    } else if directive.plus {
        "+"
    } else if directive.space {
        " "
    } else {
        ""
    };
    format!("{sign}{digits}")
}

fn unsigned(directive: &Directive, arg: Option<u64>, radix: u32, upper: bool) -> String {
    let Some(word) = arg else {
        return "(missing)".to_string();
    };
    let value = match directive.bits {
        8 => word as u8 as u64,
        16 => word as u16 as u64,
        32 => word as u32 as u64,
        _ => word,
    };
    let mut digits = match (radix, upper) {
        (16, true) => format!("{value:X}"),
        (16, false) => format!("{value:x}"),
        (8, _) => format!("{value:o}"),
        _ => value.to_string(),
    };
    if let Some(precision) = directive.precision {
        if digits.len() < precision {
            digits = format!("{}{digits}", "0".repeat(precision - digits.len()));
        }
    }
    match (directive.alt && value != 0, radix, upper) {
        (true, 16, true) => format!("0X{digits}"),
        (true, 16, false) => format!("0x{digits}"),
        (true, 8, _) if !digits.starts_with('0') => format!("0{digits}"),
        _ => digits,
    }
}

fn float(directive: &Directive, conversion: char, arg: Option<u64>) -> String {
    let Some(word) = arg else {
        return "(missing)".to_string();
    };
    let value = f64::from_bits(word);
    let precision = directive.precision.unwrap_or(6);
    let body = if !value.is_finite() {
        if value.is_nan() {
            "nan".to_string()
        } else {
            "inf".to_string()
        }
    } else {
        match conversion.to_ascii_lowercase() {
            'e' => exponent(value.abs(), precision),
            'g' => general(value.abs(), precision, directive.alt),
            _ => format!("{:.*}", precision, value.abs()),
        }
    };
    let body = if conversion.is_ascii_uppercase() {
        body.to_ascii_uppercase()
    } else {
        body
    };
    let sign = if value.is_sign_negative() && !value.is_nan() {
        "-"
    } else if directive.plus {
        "+"
    } else if directive.space {
        " "
    } else {
        ""
    };
    format!("{sign}{body}")
}

/// `d.ddde±dd`, as C prints it.
fn exponent(value: f64, precision: usize) -> String {
    let text = format!("{:.*e}", precision, value);
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.unsigned_abs())
        }
        None => text,
    }
}

fn general(value: f64, precision: usize, keep_zeros: bool) -> String {
    let precision = precision.max(1);
    // The exponent the value has once rounded to `precision` digits.
    let exp = format!("{:.*e}", precision - 1, value)
        .split_once('e')
        .and_then(|(_, exp)| exp.parse::<i32>().ok())
        .unwrap_or(0);
    let text = if exp < -4 || exp >= precision as i32 {
        exponent(value, precision - 1)
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        format!("{:.*}", decimals, value)
    };
    if keep_zeros {
        return text;
    }
    match text.split_once('e') {
        Some((mantissa, exp)) => format!("{}e{exp}", trim_zeros(mantissa)),
        None => trim_zeros(&text).to_string(),
    }
}

fn trim_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// Length of the sign and radix prefix that zero padding goes after.
fn prefix_len(text: &str) -> usize {
    let sign = usize::from(text.starts_with(['-', '+', ' ']));
    let rest = &text[sign..];
    if rest.starts_with("0x") || rest.starts_with("0X") {
        sign + 2
    } else {
        sign
    }
}

fn pad(out: &mut String, directive: &Directive, text: &str, conversion: char) {
    let width = directive.width.unwrap_or(0);
    let len = text.chars().count();
    if len >= width {
        out.push_str(text);
        return;
    }
    let fill = width - len;
    let float = matches!(conversion, 'f' | 'F' | 'e' | 'E' | 'g' | 'G');
    let integer = matches!(conversion, 'd' | 'i' | 'u' | 'x' | 'X' | 'o');
    if directive.left {
        out.push_str(text);
        out.extend(std::iter::repeat_n(' ', fill));
    } else if directive.zero && (float || integer && directive.precision.is_none()) {
        let (prefix, digits) = text.split_at(prefix_len(text));
        out.push_str(prefix);
        out.extend(std::iter::repeat_n('0', fill));
        out.push_str(digits);
    } else {
        out.extend(std::iter::repeat_n(' ', fill));
        out.push_str(text);
    }
}
