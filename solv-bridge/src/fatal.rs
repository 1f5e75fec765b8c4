use crate::error::BridgeError;

/// Diagnostic line printed before a fatal exit.
pub fn fatal_diagnostic(err: &BridgeError) -> String {
    format!("Fatal {} error: {}", err.kind(), err)
}

/// Top-level handler: returns the value, or logs the diagnostic, prints it
/// to stderr and terminates the process with status 1.
pub fn exit_on_fatal<T>(result: Result<T, BridgeError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            let line = fatal_diagnostic(&err);
            log::error!("{}", line);
            eprintln!("{}", line);
            std::process::exit(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_names_category_and_check() {
        let err = BridgeError::Divergence {
            iterations: 12,
            residual: 4.5e8,
        };
        let line = fatal_diagnostic(&err);
        assert!(line.starts_with("Fatal numerical divergence error:"));
        assert!(line.contains("12 iterations"));
    }

    #[test]
    fn test_ok_passes_through() {
        assert_eq!(exit_on_fatal(Ok::<_, BridgeError>(3)), 3);
    }
}
