//! Primary-HDU FITS decoding for 32-bit float frames.

use std::time::Instant;

use rayon::prelude::*;
use tracing::debug;

use crate::domain::{Image, ImageHeader};
use crate::error::QlError;

pub const BLOCK_SIZE: usize = 2880;
pub const CARD_SIZE: usize = 80;
const KEYWORD_SIZE: usize = 8;
const VALUE_OFFSET: usize = 10;
pub const FLOAT32_BITPIX: i64 = -32;

/// Reads 80-byte cards across 2880-byte blocks until `END`.
pub fn parse_header(bytes: &[u8]) -> Result<ImageHeader, QlError> {
    let mut header = ImageHeader::default();

    for (index, card) in bytes.chunks(CARD_SIZE).enumerate() {
        if card.len() < CARD_SIZE {
            break;
        }
        let keyword = String::from_utf8_lossy(&card[..KEYWORD_SIZE]);
        let keyword = keyword.trim_end();
        if keyword == "END" {
            let line_end = (index + 1) * CARD_SIZE;
            header.data_offset = line_end.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
            return Ok(header);
        }
        apply_card(&mut header, keyword, card)?;
    }

    Err(QlError::ImageDecodeFailed(
        "header has no END card".to_string(),
    ))
}

fn apply_card(header: &mut ImageHeader, keyword: &str, card: &[u8]) -> Result<(), QlError> {
    match keyword {
        "BITPIX" => header.bitpix = int_value(keyword, card)?,
        "NAXIS" => header.naxis = int_value(keyword, card)?,
        "NAXIS1" => header.width = axis_value(keyword, card)?,
        "NAXIS2" => header.height = axis_value(keyword, card)?,
        "IGNRVAL" => header.ignrval = float_value(keyword, card)?,
        "CRVAL1" => header.crval1 = float_value(keyword, card)?,
        "CRVAL2" => header.crval2 = float_value(keyword, card)?,
        "CDELT1" => header.cdelt1 = float_value(keyword, card)?,
        "CDELT2" => header.cdelt2 = float_value(keyword, card)?,
        "CRPIX1" => header.crpix1 = float_value(keyword, card)?,
        "CRPIX2" => header.crpix2 = float_value(keyword, card)?,
        "CD1_1" => header.cd1_1 = float_value(keyword, card)?,
        "CD1_2" => header.cd1_2 = float_value(keyword, card)?,
        "CD2_1" => header.cd2_1 = float_value(keyword, card)?,
        "CD2_2" => header.cd2_2 = float_value(keyword, card)?,
        _ => {}
    }
    Ok(())
}

fn raw_value(card: &[u8]) -> String {
    let text = String::from_utf8_lossy(&card[VALUE_OFFSET..]);
    let value = match text.find('/') {
        Some(pos) => &text[..pos],
        None => &text[..],
    };
    value.trim().to_string()
}

fn int_value(keyword: &str, card: &[u8]) -> Result<i64, QlError> {
    let value = raw_value(card);
    value
        .parse()
        .map_err(|_| QlError::ImageDecodeFailed(format!("{keyword}: invalid integer {value:?}")))
}

fn axis_value(keyword: &str, card: &[u8]) -> Result<usize, QlError> {
    let value = int_value(keyword, card)?;
    usize::try_from(value)
        .map_err(|_| QlError::ImageDecodeFailed(format!("{keyword}: negative axis {value}")))
}

fn float_value(keyword: &str, card: &[u8]) -> Result<f64, QlError> {
    // Fortran-style exponents (1.5D+02) are legal in FITS.
    let value = raw_value(card).replace(['D', 'd'], "E");
    value
        .parse()
        .map_err(|_| QlError::ImageDecodeFailed(format!("{keyword}: invalid number {value:?}")))
}

/// Bit-exact big-endian IEEE-754 conversion.
#[inline]
pub fn be_f32(bytes: [u8; 4]) -> f32 {
    f32::from_bits(u32::from_be_bytes(bytes))
}

fn convert(src: &[u8], dst: &mut [f32]) {
    for (value, chunk) in dst.iter_mut().zip(src.chunks_exact(4)) {
        *value = be_f32([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

/// Splits `pixels` into `tasks` contiguous ranges and converts each range on
/// its own rayon task. Returns once every range has been written.
///
/// `data` must hold at least `pixels.len() * 4` bytes.
pub fn decode_pixels(data: &[u8], pixels: &mut [f32], tasks: usize) {
    if pixels.is_empty() {
        return;
    }
    let per_task = pixels.len().div_ceil(tasks.max(1));
    let data = &data[..pixels.len() * 4];
    pixels
        .par_chunks_mut(per_task)
        .zip(data.par_chunks(per_task * 4))
        .for_each(|(dst, src)| convert(src, dst));
}

/// Decodes a complete FITS byte stream. `BITPIX` is checked before any pixel
/// storage is allocated.
pub fn decode_image(bytes: &[u8], tasks: usize) -> Result<Image, QlError> {
    let header = parse_header(bytes)?;
    if header.bitpix != FLOAT32_BITPIX {
        return Err(QlError::UnsupportedImageFormat(header.bitpix));
    }

    let count = header
        .width
        .checked_mul(header.height)
        .ok_or_else(|| QlError::ImageDecodeFailed("image dimensions overflow".to_string()))?;
    let needed = count
        .checked_mul(4)
        .and_then(|len| len.checked_add(header.data_offset))
        .ok_or_else(|| QlError::ImageDecodeFailed("image dimensions overflow".to_string()))?;
    if bytes.len() < needed {
        return Err(QlError::ImageDecodeFailed(format!(
            "truncated pixel data: need {needed} bytes, have {}",
            bytes.len()
        )));
    }

    let start = Instant::now();
    let mut pixels = vec![0f32; count];
    decode_pixels(&bytes[header.data_offset..], &mut pixels, tasks);
    debug!(
        width = header.width,
        height = header.height,
        tasks,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "decoded pixels"
    );

    Ok(Image::new(header, pixels))
}
