use std::backtrace::Backtrace;
use std::sync::Once;

use stepview_config::{init_tracing, LoggingConfig};

static PANIC_HOOK: Once = Once::new();

/// Initialize structured logging and install a global panic hook.
///
/// The hook records the panic through `tracing` and then hands over to the
/// previously installed hook.
pub fn init(logging: &LoggingConfig) {
    init_tracing(logging);

    let include_backtrace = logging.include_backtrace;
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let message = panic_message(info);
            let location = info.location().map(|loc| loc.to_string());
            if include_backtrace {
                let backtrace = Backtrace::force_capture().to_string();
                tracing::error!(
                    target: "stepview.panic",
                    %message,
                    location = location.as_deref().unwrap_or("<unknown>"),
                    %backtrace,
                    "panic"
                );
            } else {
                tracing::error!(
                    target: "stepview.panic",
                    %message,
                    location = location.as_deref().unwrap_or("<unknown>"),
                    "panic"
                );
            }
            previous(info);
        }));
    });
}

fn panic_message(info: &std::panic::PanicHookInfo<'_>) -> String {
    if let Some(message) = info.payload().downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
