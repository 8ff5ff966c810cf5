/// Creates an [`crate::error::AutosubError`] from a kind, a static description and optional detail.
#[macro_export]
macro_rules! autosub_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::AutosubError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::AutosubError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::AutosubError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::AutosubError::from(($kind, $desc, $detail.to_string()))
            .with_source($source)
    };
}

/// Returns early with an [`crate::error::AutosubError`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::autosub_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::autosub_error!($kind, $desc, source: $source))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::autosub_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::autosub_error!(
            $kind,
            $desc,
            $detail,
            source: $source
        ))
    };
}
