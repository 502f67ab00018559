use crate::{name::AmlName, name::AmlNamePath, Handler};
use log::{Log, Metadata, Record};
use std::{println, string::ToString};

pub(crate) struct TestHandler;

impl Handler for TestHandler {}

struct TestLogger;

impl Log for TestLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        println!("[{:<5}] {}", record.level().to_string(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: TestLogger = TestLogger;

/// Install the test logger. Tests run in parallel, so this is called by every test that wants output and only
/// the first call takes effect.
pub(crate) fn init_logger() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Trace);
    }
}

/// Decode an encoded name, and copy it out so it can be resolved with `as_path`.
pub(crate) fn path(bytes: &[u8]) -> AmlName {
    let (path, _) = AmlNamePath::parse(bytes).unwrap();
    path.to_name()
}
