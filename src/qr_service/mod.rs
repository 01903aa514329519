//! QR code rendering
//!
//! Gallery-URL and WiFi-join QR codes served as PNG to the kiosk and the
//! captive portal.

use crate::error::{Error, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use qrcodegen::{QrCode, QrCodeEcc};
use std::io::Cursor;

/// Quiet-zone border, in modules
const BORDER: u32 = 2;

/// Render a QR code for `payload` as a PNG of roughly `size` pixels.
pub fn render_qr_png(payload: &str, size: u32) -> Result<Vec<u8>> {
    let qr = QrCode::encode_text(payload, QrCodeEcc::Medium)
        .map_err(|e| Error::Internal(format!("qr encode failed: {}", e)))?;

    let modules = qr.size() as u32 + BORDER * 2;
    let scale = (size / modules).max(1);
    let px = modules * scale;

    let mut img = GrayImage::from_pixel(px, px, Luma([255]));
    for y in 0..qr.size() {
        for x in 0..qr.size() {
            if !qr.get_module(x, y) {
                continue;
            }
            let x0 = (x as u32 + BORDER) * scale;
            let y0 = (y as u32 + BORDER) * scale;
            for dy in 0..scale {
                for dx in 0..scale {
                    img.put_pixel(x0 + dx, y0 + dy, Luma([0]));
                }
            }
        }
    }

    // Nearest keeps module edges crisp when snapping to the requested size
    let img = if px != size {
        image::imageops::resize(&img, size, size, FilterType::Nearest)
    } else {
        img
    };

    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| Error::Internal(format!("qr png encode failed: {}", e)))?;
    Ok(buf)
}

/// Standard WiFi-join payload understood by iOS and Android scanners.
pub fn wifi_payload(ssid: &str, password: &str) -> String {
    if password.is_empty() {
        format!("WIFI:S:{};;", ssid)
    } else {
        format!("WIFI:T:WPA;S:{};P:{};;", ssid, password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_qr_png() {
        let png = render_qr_png("http://192.168.4.1:8000/session/abc", 256).unwrap();
        // PNG magic bytes
        assert_eq!(&png[0..4], &[0x89, b'P', b'N', b'G']);

        let img = image::load_from_memory(&png).unwrap();
        assert_eq!(img.width(), 256);
        assert_eq!(img.height(), 256);
    }

    #[test]
    fn test_wifi_payload() {
        assert_eq!(
            wifi_payload("SnapBooth", "photobooth"),
            "WIFI:T:WPA;S:SnapBooth;P:photobooth;;"
        );
        assert_eq!(wifi_payload("OpenBooth", ""), "WIFI:S:OpenBooth;;");
    }

    #[test]
    fn test_render_deterministic() {
        let a = render_qr_png("same payload", 200).unwrap();
        let b = render_qr_png("same payload", 200).unwrap();
        assert_eq!(a, b);
    }
}
