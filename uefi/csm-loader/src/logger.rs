use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Logger writing to the UEFI console. Valid while boot services are
/// active, which covers the entire staging flow.
pub struct UefiLogger {
    max_level: LevelFilter,
}

impl UefiLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Call this once during early init.
    #[allow(static_mut_refs, clippy::missing_errors_doc)]
    pub fn init(self) -> Result<&'static Self, SetLoggerError> {
        // log::set_logger requires &'static dyn Log; keep the instance in
        // a static rather than leaking a box.
        static mut LOGGER: Option<UefiLogger> = None;

        unsafe {
            LOGGER = Some(self);
            log::set_logger(LOGGER.as_ref().unwrap() as &'static dyn Log)?;
        }
        log::set_max_level(LevelFilter::Trace);
        unsafe { Ok(LOGGER.as_ref().expect("initialized")) }
    }
}

impl Log for UefiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        uefi::println!("[{}] {}: {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}
