//! Ambient logging surface (SPEC_FULL.md §1A). Plain `log` crate macros,
//! no structured/tracing layer: `NoticeResponse` is re-emitted at a level
//! derived from its severity and `ParameterStatus` updates are logged at
//! `debug` for diagnosability, mirroring the teacher's `logger.rs` helper
//! but without its SQL-statement-timing machinery (out of scope here).

use crate::message::ErrorFields;

pub(crate) fn log_notice(fields: &ErrorFields) {
    let level = fields.severity.to_log_level();
    if log::log_enabled!(level) {
        log::log!(
            level,
            "{} ({}): {}",
            severity_name(fields.severity),
            fields.code,
            fields.message
        );
    }
}

pub(crate) fn log_parameter_status(name: &str, value: &str) {
    log::debug!("parameter status: {} = {}", name, value);
}

/// `NotificationResponse` (an async `NOTIFY` delivery) can arrive
/// interleaved with any other backend message, per the protocol; §1 treats
/// the `LISTEN`/`NOTIFY` subsystem itself as an external collaborator, so
/// this core's obligation is only to drain it without derailing whatever
/// operation is in flight.
pub(crate) fn log_notification(pid: i32, channel: &str, payload: &str) {
    log::debug!("notification on {:?} from pid {}: {}", channel, pid, payload);
}

fn severity_name(severity: crate::message::PgSeverity) -> &'static str {
    use crate::message::PgSeverity::*;
    match severity {
        Panic => "PANIC",
        Fatal => "FATAL",
        Error => "ERROR",
        Warning => "WARNING",
        Notice => "NOTICE",
        Debug => "DEBUG",
        Info => "INFO",
        Log => "LOG",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PgSeverity;

    #[test]
    fn severity_name_round_trips_the_common_cases() {
        assert_eq!(severity_name(PgSeverity::Notice), "NOTICE");
        assert_eq!(severity_name(PgSeverity::Error), "ERROR");
    }
}
