//! Single-line logging with timestamps, source locations and optional colour.
//!
//! Every line emitted through [`clog!`] has the shape:
//!
//! ```text
//! 20261016T09:14:02.118 - src/sharing.rs:88 - share: granted edit on r-5f0c2a1 to u-91ab7e0
//! ```
//!
//! When stderr is a terminal the timestamp and location are dimmed and user
//! and resource ids get a stable colour derived from their text.  A custom
//! destination can be installed with [`set_writer`], which also turns colour
//! off.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

static COLOUR_ENABLED: AtomicBool = AtomicBool::new(false);

static LOG_WRITER: LazyLock<Mutex<Box<dyn Write + Send>>> =
    LazyLock::new(|| Mutex::new(Box::new(io::stderr())));

/// Detect colour support on stderr. Call once at startup.
pub fn init() {
    COLOUR_ENABLED.store(io::stderr().is_terminal(), Ordering::Relaxed);
}

/// Send all further log lines to `w` and disable colour.
pub fn set_writer(w: Box<dyn Write + Send>) {
    COLOUR_ENABLED.store(false, Ordering::Relaxed);
    if let Ok(mut writer) = LOG_WRITER.lock() {
        *writer = w;
    }
}

pub fn colour_enabled() -> bool {
    COLOUR_ENABLED.load(Ordering::Relaxed)
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const RESOURCE_COLOUR: &str = "\x1b[96m";

const USER_COLOURS: &[&str] = &[
    "\x1b[91m", "\x1b[92m", "\x1b[93m", "\x1b[94m", "\x1b[95m", "\x1b[31m", "\x1b[32m",
    "\x1b[33m", "\x1b[34m", "\x1b[35m",
];

const ID_DISPLAY_LEN: usize = 7;

fn colour_for(id: &str) -> &'static str {
    let hash = id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    USER_COLOURS[hash as usize % USER_COLOURS.len()]
}

fn short(id: &str) -> &str {
    match id.char_indices().nth(ID_DISPLAY_LEN) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Render a user id as `u-xxxxxxx`, coloured by content when enabled.
pub fn user_id(id: &str) -> String {
    if colour_enabled() {
        format!("{}u-{}{RESET}", colour_for(id), short(id))
    } else {
        format!("u-{}", short(id))
    }
}

/// Render a list, note, task or grant id as `r-xxxxxxx`.
pub fn resource_id(id: &str) -> String {
    if colour_enabled() {
        format!("{RESOURCE_COLOUR}r-{}{RESET}", short(id))
    } else {
        format!("r-{}", short(id))
    }
}

/// Civil (year, month, day) for a count of days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u64, u64) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe as i64 + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// Current wall-clock time as `YYYYMMDDTHH:MM:SS.mmm` (UTC).
pub fn format_timestamp() -> String {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = elapsed.as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    let of_day = secs % 86_400;
    format!(
        "{year:04}{month:02}{day:02}T{:02}:{:02}:{:02}.{:03}",
        of_day / 3600,
        (of_day % 3600) / 60,
        of_day % 60,
        elapsed.subsec_millis()
    )
}

/// Write one formatted line. Used by [`clog!`].
pub fn emit(file: &str, line: u32, msg: &str) {
    let ts = format_timestamp();
    let formatted = if colour_enabled() {
        format!("{DIM}{ts} {file}:{line}{RESET} {msg}")
    } else {
        format!("{ts} - {file}:{line} - {msg}")
    };
    if let Ok(mut writer) = LOG_WRITER.lock() {
        let _ = writeln!(*writer, "{formatted}");
    }
}

/// Log a line with timestamp and source location.
///
/// ```ignore
/// clog!("ledger: {} accepted request {}", logging::user_id(&uid), logging::resource_id(&rid));
/// ```
#[macro_export]
macro_rules! clog {
    ($($arg:tt)*) => {{
        $crate::logging::emit(file!(), line!(), &format!($($arg)*));
    }};
}
