//! Module that contains the coloured console logger used by peers and the printer server.

use color_print::cformat;
use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Function that enables or disables `debug` output.
pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Function that prints an informative message.
pub fn info(msg: &str) {
    println!("{}", cformat!("<green, bold>[INFO]</green, bold> {msg}"));
}

/// Function that prints a warning.
pub fn warn(msg: &str) {
    eprintln!("{}", cformat!("<yellow, bold>[WARN]</yellow, bold> {msg}"));
}

/// Function that prints an error.
pub fn error(msg: &str) {
    eprintln!("{}", cformat!("<red, bold>[ERROR]</red, bold> {msg}"));
}

/// Function that prints a debug message when verbose output is enabled.
pub fn debug(msg: &str) {
    if is_verbose() {
        println!("{}", cformat!("<blue, bold>[DEBUG]</blue, bold> {msg}"));
    }
}
