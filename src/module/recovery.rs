//! Panic recovery at the module-loop boundary.
//!
//! A handler that panics must not take its module down: the panic is caught,
//! logged with the stack captured at the panic site, and turned into an error.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Once;

use crate::types::{Error, Result};

static HOOK: Once = Once::new();

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Chain a panic hook that records the panicking thread's backtrace so the
/// recovery site can log it. Safe to call repeatedly.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

/// Execute a function with panic recovery.
///
/// If the function panics, the panic is captured, logged, and converted
/// to an error.
///
/// # Example
/// ```
/// use wheelhouse::module::with_recovery;
///
/// let result = with_recovery(|| 40 + 2, "answer");
/// assert_eq!(result.unwrap(), 42);
/// ```
pub fn with_recovery<F, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> T,
{
    match catch_unwind(AssertUnwindSafe(operation)) {
        Ok(value) => Ok(value),
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            let trace = LAST_BACKTRACE
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_else(|| "<no backtrace captured>".to_string());
            tracing::error!(
                operation = operation_name,
                backtrace = %trace,
                "panic_recovered: {}",
                panic_msg
            );

            Err(Error::internal(format!(
                "Panic in {}: {}",
                operation_name, panic_msg
            )))
        }
    }
}

/// Extract panic message from panic payload.
fn extract_panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (no message)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_with_recovery_success() {
        let result = with_recovery(|| 42, "test_operation");
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_with_recovery_panic_str() {
        let result: Result<()> = with_recovery(
            || {
                panic!("test panic");
            },
            "test_operation",
        );

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("Panic in test_operation"));
        assert!(err_msg.contains("test panic"));
    }

    #[test]
    fn test_with_recovery_panic_string() {
        let result: Result<()> = with_recovery(
            || {
                panic!("{}", "dynamic panic message");
            },
            "test_operation",
        );

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("dynamic panic message"));
    }

    #[test]
    fn test_hook_records_backtrace_for_recovery() {
        install_panic_hook();
        install_panic_hook();
        let _ = with_recovery(|| panic!("traced"), "hooked");
        // Consumed by the recovery above
        assert!(LAST_BACKTRACE.with(|slot| slot.borrow().is_none()));
    }

    #[test]
    #[traced_test]
    fn test_recovered_panic_is_logged() {
        let _ = with_recovery(|| panic!("logged panic"), "logged_op");
        assert!(logs_contain("panic_recovered"));
        assert!(logs_contain("logged_op"));
    }

    #[test]
    fn test_extract_panic_message_unknown() {
        let panic_result = std::panic::catch_unwind(|| {
            std::panic::panic_any(17u8);
        });

        match panic_result {
            Err(payload) => {
                assert_eq!(extract_panic_message(&payload), "Unknown panic (no message)");
            }
            Ok(_) => panic!("Expected panic"),
        }
    }
}
