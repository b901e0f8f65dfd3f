//! Property-based tests for the version grammar.

#[cfg(test)]
mod tests {
    use crate::prompt::FixedAnswer;
    use crate::version::{reconcile, VersionTuple};
    use proptest::prelude::*;

    fn suffix_strategy() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            Just(None),
            "-[0-9]{1,2}".prop_map(Some),
            "-[0-9]{1,2}~[a-z]{4,7}[0-9]{2}".prop_map(Some),
        ]
    }

    proptest! {
        /// Rendering then parsing yields the same tuple.
        #[test]
        fn display_parses_back(
            major in 0u64..100,
            minor in 0u64..100,
            patch in 0u64..100,
            suffix in suffix_strategy(),
            build in proptest::option::of((1i64..4_000_000_000, "[0-9a-f]{7}")),
        ) {
            let mut version = VersionTuple { major, minor, patch, suffix, build: None };
            if let Some((ts, commit)) = build {
                version = version.with_build(ts, &commit);
            }
            let parsed: VersionTuple = version.to_string().parse().unwrap();
            prop_assert_eq!(parsed, version);
        }

        /// Suffixes never affect whether two sources agree.
        #[test]
        fn suffix_does_not_break_alignment(
            major in 0u64..50,
            minor in 0u64..50,
            patch in 0u64..50,
            suffix in suffix_strategy(),
        ) {
            let literal = VersionTuple { major, minor, patch, suffix: None, build: None };
            let changelog = VersionTuple { major, minor, patch, suffix, build: None };
            prop_assert!(reconcile(&literal, &changelog, &FixedAnswer(false)).is_ok());
        }

        /// Any difference in the release triple needs confirmation.
        #[test]
        fn release_difference_blocks(
            major in 0u64..50,
            minor in 0u64..50,
            patch in 0u64..50,
            bump in 1u64..5,
        ) {
            let literal = VersionTuple { major, minor, patch, suffix: None, build: None };
            let changelog = VersionTuple { major, minor: minor + bump, patch, suffix: Some("-1".into()), build: None };
            prop_assert!(reconcile(&literal, &changelog, &FixedAnswer(false)).is_err());
        }
    }
}
