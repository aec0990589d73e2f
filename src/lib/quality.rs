//! Conversion of low quality barcode bases to no-calls.
use thiserror::Error;

/// The quality at or below which bases are converted when no threshold is configured.
pub const DEFAULT_MAX_LOW_QUALITY_TO_CONVERT: u8 = 15;

/// The offset of Phred+33 encoded qualities.
const PHRED_OFFSET: i32 = 33;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Barcode '{barcode}' and quality '{quality}' are different lengths")]
pub struct QualityLengthMismatch {
    pub barcode: String,
    pub quality: String,
}

/// Replaces alphabetic bases of `barcode` whose quality is at or below `max_low_quality` with `N`.
///
/// A threshold of zero uses [`DEFAULT_MAX_LOW_QUALITY_TO_CONVERT`].  Without a quality string the
/// barcode is returned unchanged.
pub fn correct(
    barcode: &str,
    quality: Option<&str>,
    max_low_quality: u8,
) -> Result<String, QualityLengthMismatch> {
    let quality = match quality {
        Some(q) => q,
        None => return Ok(barcode.to_string()),
    };
    if barcode.len() != quality.len() {
        return Err(QualityLengthMismatch {
            barcode: barcode.to_string(),
            quality: quality.to_string(),
        });
    }

    let threshold = if max_low_quality == 0 {
        DEFAULT_MAX_LOW_QUALITY_TO_CONVERT
    } else {
        max_low_quality
    };

    let corrected = barcode
        .chars()
        .zip(quality.bytes())
        .map(|(base, qual)| {
            if base.is_ascii_alphabetic() && i32::from(qual) - PHRED_OFFSET <= i32::from(threshold)
            {
                'N'
            } else {
                base
            }
        })
        .collect();
    Ok(corrected)
}
