// ═══════════════════════════════════════════════════════════════════
// Error Tests — CoreError variants, Display formatting, From impls
// ═══════════════════════════════════════════════════════════════════

use portfolio_valuation_core::errors::CoreError;

// ── Display formatting ──────────────────────────────────────────────

mod display {
    use super::*;

    #[test]
    fn convergence() {
        let err = CoreError::Convergence("XIRR did not converge within 100 iterations".into());
        assert_eq!(
            err.to_string(),
            "Unable to compute return: XIRR did not converge within 100 iterations"
        );
    }

    #[test]
    fn invalid_input() {
        let err = CoreError::InvalidInput("CAGR time span must be positive".into());
        assert_eq!(err.to_string(), "Invalid input: CAGR time span must be positive");
    }

    #[test]
    fn no_price_available() {
        let err = CoreError::NoPriceAvailable("INFY".into());
        assert_eq!(
            err.to_string(),
            "No price available for INFY: all sources failed and nothing is cached"
        );
    }

    #[test]
    fn source_fetch() {
        let err = CoreError::source_fetch("Broker", "HTTP 503");
        assert_eq!(err.to_string(), "Price source error (Broker): HTTP 503");
    }

    #[test]
    fn timeout() {
        let err = CoreError::Timeout {
            provider: "Quote Page".into(),
            millis: 8000,
        };
        assert_eq!(err.to_string(), "Price source Quote Page timed out after 8000 ms");
    }

    #[test]
    fn timeout_from_duration() {
        let err = CoreError::timeout("Broker", std::time::Duration::from_secs(8));
        assert_eq!(
            err,
            CoreError::Timeout {
                provider: "Broker".into(),
                millis: 8000
            }
        );
    }

    #[test]
    fn huge_timeout_saturates() {
        let err = CoreError::timeout("Broker", std::time::Duration::MAX);
        assert_eq!(
            err,
            CoreError::Timeout {
                provider: "Broker".into(),
                millis: u64::MAX
            }
        );
    }

    #[test]
    fn validation_error() {
        let err = CoreError::ValidationError("Transaction quantity must be non-zero".into());
        assert_eq!(
            err.to_string(),
            "Transaction validation failed: Transaction quantity must be non-zero"
        );
    }

    #[test]
    fn not_found_variants() {
        assert_eq!(
            CoreError::PortfolioNotFound("p1".into()).to_string(),
            "Portfolio not found: p1"
        );
        assert_eq!(
            CoreError::HoldingNotFound("INFY".into()).to_string(),
            "Holding not found: INFY"
        );
    }

    #[test]
    fn config() {
        let err = CoreError::Config("unknown timezone 'Mars/Olympus'".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: unknown timezone 'Mars/Olympus'"
        );
    }

    #[test]
    fn storage_variants() {
        assert_eq!(
            CoreError::Serialization("boom".into()).to_string(),
            "Serialization error: boom"
        );
        assert_eq!(
            CoreError::Deserialization("eof".into()).to_string(),
            "Deserialization error: eof"
        );
        assert_eq!(
            CoreError::FileIO("denied".into()).to_string(),
            "File I/O error: denied"
        );
    }
}

// ── Clone / PartialEq (shared by coalesced refreshes) ───────────────

mod clone_eq {
    use super::*;

    #[test]
    fn clone_is_equal() {
        let err = CoreError::Timeout {
            provider: "Broker".into(),
            millis: 10,
        };
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn different_variants_differ() {
        assert_ne!(
            CoreError::NoPriceAvailable("A".into()),
            CoreError::HoldingNotFound("A".into())
        );
    }
}

// ── From impls ──────────────────────────────────────────────────────

mod from_impls {
    use super::*;

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(matches!(err, CoreError::Deserialization(_)));
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: CoreError = toml_err.into();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CoreError = io_err.into();
        assert_eq!(err, CoreError::FileIO("denied".into()));
    }

    #[test]
    fn question_mark_propagates() {
        fn parse() -> Result<serde_json::Value, CoreError> {
            Ok(serde_json::from_str("[1, 2")?)
        }
        assert!(matches!(parse(), Err(CoreError::Deserialization(_))));
    }
}

// ── std::error::Error ───────────────────────────────────────────────

mod std_error {
    use super::*;

    #[test]
    fn implements_std_error() {
        fn assert_error<E: std::error::Error + Send + Sync + 'static>(_: &E) {}
        assert_error(&CoreError::Network("down".into()));
    }

    #[test]
    fn boxes_into_dyn_error() {
        let boxed: Box<dyn std::error::Error> = Box::new(CoreError::Network("down".into()));
        assert_eq!(boxed.to_string(), "Network error: down");
    }
}
