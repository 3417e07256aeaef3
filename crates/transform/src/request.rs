use crate::error::{Error, ErrorKind, Result};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;

/// Default encoder quality for thumbnails; small files over fidelity.
pub const DEFAULT_QUALITY: u8 = 40;
/// Default upper bound on a single transform.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounding box of a derived image, rendered as `"WxH"`.
///
/// Images are scaled to fit inside the box with their aspect ratio kept.
///
/// ```
/// use folio_transform::Dimensions;
/// let dims: Dimensions = "320x200".parse().unwrap();
/// assert_eq!((dims.width(), dims.height()), (320, 200));
/// assert_eq!(dims.to_string(), "320x200");
/// assert!("0x200".parse::<Dimensions>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    width: u32,
    height: u32,
}
impl Dimensions {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            exn::bail!(ErrorKind::InvalidRequest(format!("dimensions must be at least 1x1, got {width}x{height}")));
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}
impl Default for Dimensions {
    fn default() -> Self {
        Self { width: 200, height: 200 }
    }
}
impl Display for Dimensions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}x{}", self.width, self.height)
    }
}
impl FromStr for Dimensions {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ErrorKind::InvalidRequest(format!("expected WIDTHxHEIGHT, got `{s}`"));
        let (width, height) = s.split_once(['x', 'X']).ok_or_else(|| exn::Exn::from(invalid()))?;
        let width = width.trim().parse().map_err(|_| exn::Exn::from(invalid()))?;
        let height = height.trim().parse().map_err(|_| exn::Exn::from(invalid()))?;
        Self::new(width, height)
    }
}

/// Encoder quality, 1 (worst) to 100 (best).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quality(u8);
impl Quality {
    pub fn new(quality: u8) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            exn::bail!(ErrorKind::InvalidRequest(format!("quality must be within 1..=100, got {quality}")));
        }
        Ok(Self(quality))
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}
impl Default for Quality {
    fn default() -> Self {
        Self(DEFAULT_QUALITY)
    }
}
impl Display for Quality {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// Everything an engine needs to know about one transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformRequest {
    pub dimensions: Dimensions,
    pub quality: Quality,
    /// Wall-clock budget for the whole transform, output included.
    pub timeout: Duration,
}
impl TransformRequest {
    pub fn new(dimensions: Dimensions, quality: Quality) -> Self {
        Self {
            dimensions,
            quality,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
