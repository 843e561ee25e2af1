use proptest::prelude::*;
use shjob::{LaunchDescriptor, LineBuffer, SubmitError};
use shjob_runner::timeout_from_secs;

proptest! {
    /// Completed lines come back in the order they were appended.
    #[test]
    fn prop_line_buffer_preserves_order(lines in proptest::collection::vec("[^\n]*", 0..50)) {
        let mut buffer = LineBuffer::new();
        for line in &lines {
            buffer.append(Some(line.clone()));
        }
        buffer.append(None);

        let frozen = buffer.freeze();
        prop_assert_eq!(frozen.as_slice(), lines.as_slice());
    }

    /// A capped buffer keeps exactly the newest `cap` lines.
    #[test]
    fn prop_line_buffer_cap_keeps_suffix(
        lines in proptest::collection::vec("[a-z0-9]{0,8}", 0..60),
        cap in 1usize..20,
    ) {
        let mut buffer = LineBuffer::with_max_lines(Some(cap));
        for line in &lines {
            buffer.append(Some(line.clone()));
        }

        let keep = lines.len().min(cap);
        prop_assert_eq!(buffer.total_lines(), lines.len());
        prop_assert_eq!(buffer.was_truncated(), lines.len() > cap);
        let frozen = buffer.freeze();
        prop_assert_eq!(frozen.as_slice(), &lines[lines.len() - keep..]);
    }

    /// Whitespace-only command lines are always rejected as empty.
    #[test]
    fn prop_blank_command_lines_rejected(blank in "[ \t\r\n]{0,10}") {
        prop_assert_eq!(
            LaunchDescriptor::new(blank).validate(),
            Err(SubmitError::EmptyCommandLine)
        );
    }

    /// Any command line with visible text and no NUL byte is accepted.
    #[test]
    fn prop_printable_command_lines_accepted(command in "[a-z]\\PC{0,40}") {
        prop_assume!(!command.contains('\0'));
        prop_assert!(LaunchDescriptor::new(command).validate().is_ok());
    }

    /// Environment keys containing '=' never pass validation.
    #[test]
    fn prop_env_keys_with_equals_rejected(prefix in "[A-Z]{0,5}", suffix in "[A-Z]{0,5}") {
        let key = format!("{prefix}={suffix}");
        let result = LaunchDescriptor::new("true").env(key, "v").validate();
        let rejected = matches!(result, Err(SubmitError::InvalidEnvironment { .. }));
        prop_assert!(rejected);
    }

    /// Finite non-negative timeouts convert; zero means unbounded.
    #[test]
    fn prop_timeout_conversion(seconds in 0.0f64..100_000.0) {
        let timeout = timeout_from_secs(seconds).unwrap();
        if seconds == 0.0 {
            prop_assert!(timeout.is_none());
        } else {
            let duration = timeout.unwrap();
            prop_assert!((duration.as_secs_f64() - seconds).abs() < 1e-6);
        }
    }

    /// Negative timeouts are contract violations.
    #[test]
    fn prop_negative_timeout_rejected(seconds in -100_000.0f64..-1e-9) {
        let rejected = matches!(
            timeout_from_secs(seconds),
            Err(SubmitError::InvalidTimeout { .. })
        );
        prop_assert!(rejected);
    }
}

#[test]
fn test_job_ids_from_sync_submissions_increase() {
    let runner = shjob::JobRunner::new().unwrap();
    let mut previous = None;
    for _ in 0..10 {
        let id = runner
            .submit(shjob::JobRequest::new(LaunchDescriptor::new("exit 0")).synchronous(true))
            .unwrap();
        if let Some(previous) = previous {
            assert!(id > previous);
        }
        previous = Some(id);
    }
}
