mod build_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Returns the main version identifier as used for releases, e.g. `v1.0`.
pub(crate) fn identifier() -> String {
    let version = build_info::PKG_VERSION;
    format!("v{}", version.strip_suffix(".0").unwrap_or(version))
}

/// Returns an RFC 2822 formatted date of the build time in UTC.
pub(crate) fn build_time_utc() -> &'static str {
    build_info::BUILT_TIME_UTC
}

/// Returns a string containing all version-related information. The git
/// information is missing when built outside of a git checkout.
pub(crate) fn full() -> String {
    let git = match build_info::GIT_COMMIT_HASH {
        Some(hash) => format!(
            " ({}{})",
            hash,
            // `None` counts as clean, this happens in some CI runners.
            if build_info::GIT_DIRTY == Some(true) { ", dirty" } else { "" },
        ),
        None => String::new(),
    };

    format!("{}{git}, built {}", identifier(), build_time_utc())
}
