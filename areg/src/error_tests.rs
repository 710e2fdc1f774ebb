//! Tests for error handling

use crate::Error;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ResultType;

    #[test]
    fn test_error_display() {
        let err = Error::stub_not_found("Calculator");
        assert_eq!(err.to_string(), "Stub with role 'Calculator' not found");

        let err = Error::unknown_message("CalculatorService", 0x0042);
        assert_eq!(
            err.to_string(),
            "Message 0x0042 is not part of service 'CalculatorService'"
        );

        let err = Error::timeout("request 0x0001", 5000);
        assert_eq!(
            err.to_string(),
            "Operation timed out after 5000ms: request 0x0001"
        );

        let err = Error::duplicate_name("role", "Calculator");
        assert_eq!(err.to_string(), "Duplicate role name 'Calculator'");
    }

    #[test]
    fn test_error_is_retryable() {
        // Link failures and calls worth repeating
        assert!(Error::transport_msg("network failure").is_retryable());
        assert!(Error::connection_msg("connection lost").is_retryable());
        assert!(Error::timeout("request", 1000).is_retryable());
        assert!(Error::request_failed(1, ResultType::RequestBusy).is_retryable());
        assert!(Error::request_failed(1, ResultType::MessageUndelivered).is_retryable());

        // Mistakes that repeat identically
        assert!(!Error::stub_not_found("Calculator").is_retryable());
        assert!(!Error::unknown_message("svc", 7).is_retryable());
        assert!(!Error::configuration("invalid config", None).is_retryable());
        assert!(!Error::dispatcher_stopped("worker").is_retryable());
        assert!(!Error::runtime_msg("blocking call on own thread").is_retryable());
        assert!(!Error::protocol("bad frame marker", None, None).is_retryable());
        assert!(!Error::request_failed(1, ResultType::RequestInvalid).is_retryable());
    }

    #[test]
    fn test_error_with_source() {
        use std::io;

        let io_err = io::Error::new(io::ErrorKind::NotFound, "host not found");
        let err = Error::from(io_err);

        match err {
            Error::Io { message, source } => {
                assert!(message.contains("host not found"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_context_fields() {
        let err = Error::configuration("invalid port", Some("remote.port".to_string()));
        match err {
            Error::Configuration { message, field } => {
                assert_eq!(message, "invalid port");
                assert_eq!(field, Some("remote.port".to_string()));
            }
            _ => panic!("Expected Configuration error"),
        }

        let err = Error::protocol(
            "unexpected frame",
            Some("ConnectAccepted".to_string()),
            Some("Event".to_string()),
        );
        match err {
            Error::Protocol {
                message,
                expected,
                received,
            } => {
                assert_eq!(message, "unexpected frame");
                assert_eq!(expected, Some("ConnectAccepted".to_string()));
                assert_eq!(received, Some("Event".to_string()));
            }
            _ => panic!("Expected Protocol error"),
        }
    }

    #[test]
    fn test_bincode_error_conversion() {
        let data = vec![0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<String, bincode::Error> = bincode::deserialize(&data);

        if let Err(bincode_err) = result {
            let err: Error = bincode_err.into();
            assert!(matches!(err, Error::Serialization { .. }));
            assert!(err.to_string().contains("bincode encoding failed"));
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_custom_error_constructors() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::transport("connection failed", io_err);
        assert!(matches!(
            err,
            Error::Transport {
                source: Some(_),
                ..
            }
        ));

        let join_err = std::io::Error::new(std::io::ErrorKind::Other, "thread panicked");
        let err = Error::runtime("dispatcher join", join_err);
        assert!(matches!(
            err,
            Error::Runtime {
                source: Some(_),
                ..
            }
        ));
    }
}
