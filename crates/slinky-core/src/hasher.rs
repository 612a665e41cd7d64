use crate::error::HashError;
use crate::shortcode::ShortCode;

/// Derives a candidate short code from a URL.
///
/// Implementations must be deterministic and side-effect free: the same URL
/// always yields the same candidate.
pub trait UrlHasher: Send + Sync + 'static {
    fn shorten(&self, url: &str) -> Result<ShortCode, HashError>;
}

impl<T: UrlHasher + ?Sized> UrlHasher for std::sync::Arc<T> {
    fn shorten(&self, url: &str) -> Result<ShortCode, HashError> {
        (**self).shorten(url)
    }
}
