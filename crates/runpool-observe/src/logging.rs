use tracing_subscriber::EnvFilter;

/// Used when neither `RUNPOOL_LOG` nor `RUST_LOG` is set. Keeps HTTP stack
/// chatter at `warn` while runpool crates and the protocol/metrics targets log at `info`.
pub const DEFAULT_DIRECTIVES: &str = "warn,\
runpool_coordinator=info,\
runpool_agent=info,\
runpool_store=info,\
runpool_proof=info,\
runpool_metrics=info";

/// Initializes a `tracing_subscriber` using `RUNPOOL_LOG` first, then `RUST_LOG`,
/// then [`DEFAULT_DIRECTIVES`].
///
/// Log field contract for runpool processes:
/// - Always include `study_id` and `participant_id` when available.
/// - Include `run_id` on any lock, assignment or submission event.
/// - Include `check_value` only on assignment events.
/// - Protocol events go to `target: "runpool_proof"` with an `event` field;
///   periodic snapshots go to `target: "runpool_metrics"`.
pub fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("RUNPOOL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| default_filter())
}

pub fn default_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_DIRECTIVES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn default_directives_parse() {
        assert!(EnvFilter::try_new(DEFAULT_DIRECTIVES).is_ok());
    }

    #[test]
    fn default_filter_tops_out_at_info() {
        assert_eq!(default_filter().max_level_hint(), Some(LevelFilter::INFO));
    }
}
