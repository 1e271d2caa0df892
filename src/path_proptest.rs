//! Property-based tests for path primitives.

#[cfg(test)]
mod proptest_tests {
    use crate::path::{clone_dir_name, encode_url_path, glob_match, UnixPath};
    use proptest::prelude::*;

    proptest! {
        /// Property: encode_url_path never produces separators or scheme characters
        #[test]
        fn encode_url_path_never_produces_unsafe_chars(input in ".*") {
            let result = encode_url_path(&input);
            for ch in ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '@'] {
                prop_assert!(!result.contains(ch));
            }
        }

        /// Property: encode_url_path preserves alphanumeric characters
        #[test]
        fn encode_url_path_preserves_alphanumeric(input in "[a-zA-Z0-9]+") {
            prop_assert_eq!(encode_url_path(&input), input);
        }

        /// Property: clone directory names never contain separators or a .git suffix
        #[test]
        fn clone_dir_name_is_a_single_segment(
            host in "[a-z]{1,10}",
            org in "[a-z]{1,10}",
            repo in "[a-z][a-z0-9-]{0,15}",
            suffix in prop::bool::ANY,
        ) {
            let uri = format!(
                "https://{}.com/{}/{}{}",
                host,
                org,
                repo,
                if suffix { ".git" } else { "" }
            );
            let name = clone_dir_name(&uri);
            prop_assert_eq!(&name, &repo);
            prop_assert!(!name.contains('/'));
        }

        /// Property: UnixPath normalization is idempotent
        #[test]
        fn unix_path_normalization_is_idempotent(input in "[a-z/\\\\.]{0,30}") {
            let once = UnixPath::new(&input);
            let twice = UnixPath::new(once.as_str());
            prop_assert_eq!(once, twice);
        }

        /// Property: joining then stripping the prefix returns the original
        #[test]
        fn unix_path_join_strip_roundtrip(
            base in "[a-z]{1,8}(/[a-z]{1,8}){0,3}",
            rest in "[a-z]{1,8}(/[a-z]{1,8}){0,3}",
        ) {
            let base = UnixPath::new(&base);
            let joined = base.join(&rest);
            prop_assert_eq!(joined.strip_prefix(&base), Some(UnixPath::new(&rest)));
        }

        /// Property: pattern "**" matches any path
        #[test]
        fn glob_double_star_matches_all(path in "[a-zA-Z0-9_.]+(/[a-zA-Z0-9_.]+){0,4}") {
            let result = glob_match("**", &path);
            prop_assert!(result.is_ok());
            prop_assert!(result.unwrap());
        }
    }
}
