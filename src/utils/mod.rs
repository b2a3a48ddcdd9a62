//! The `utils` module collects the pieces shared by every other module:
//! the top-level error type used by the binary and the logging bootstrap.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests {
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // try_init underneath, so repeated calls must not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
    }

    #[test]
    fn level_names_are_normalized() {
        assert_eq!(logging::normalize_level("WARNING"), "warn");
        assert_eq!(logging::normalize_level("Error"), "error");
        assert_eq!(logging::normalize_level("trace"), "trace");
        assert_eq!(logging::normalize_level("chatty"), "info");
    }
}
