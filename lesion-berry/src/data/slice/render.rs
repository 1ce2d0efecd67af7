//! 显示切片的叠加渲染: 灰度影像 + 红色掩膜轮廓.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{ImageResult, Rgb, RgbImage};
use ndarray::{Array2, ArrayView2};

use crate::consts::gray::is_foreground;
use crate::consts::OUTLINE_RGB;
use crate::data::CtWindow;

/// 掩膜轮廓: 前景像素中, 4-邻域存在背景或位于图像边界的那些.
pub fn outline(mask: ArrayView2<'_, u8>) -> Array2<bool> {
    let (h, w) = mask.dim();
    Array2::from_shape_fn((h, w), |(r, c)| {
        if !is_foreground(mask[(r, c)]) {
            return false;
        }
        if r == 0 || c == 0 || r + 1 == h || c + 1 == w {
            return true;
        }
        [(r - 1, c), (r + 1, c), (r, c - 1), (r, c + 1)]
            .into_iter()
            .any(|p| !is_foreground(mask[p]))
    })
}

/// 叠加渲染器.
#[derive(Copy, Clone, Debug)]
pub struct OverlayRenderer {
    window: Option<CtWindow>,
    zoom: f64,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self {
            window: None,
            zoom: 1.0,
        }
    }
}

impl OverlayRenderer {
    /// 使用固定窗口. 不设置时, 每幅切片按自身的最小/最大值归一化.
    pub fn with_window(mut self, window: CtWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// 设置缩放倍率. 非正或非有限值视为 1.
    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = if zoom.is_finite() && zoom > 0.0 { zoom } else { 1.0 };
        self
    }

    /// 缩放倍率.
    #[inline]
    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// 渲染同一显示切片的影像与掩膜.
    ///
    /// 两者形状不一致时 panic.
    pub fn render(&self, image: ArrayView2<'_, f32>, mask: ArrayView2<'_, u8>) -> RgbImage {
        assert_eq!(image.dim(), mask.dim(), "影像切片与掩膜切片形状不一致");
        let (h, w) = image.dim();
        let window = self.window.or_else(|| CtWindow::from_extremes(image.iter()));
        let edge = outline(mask);

        let mut buf = RgbImage::new(w as u32, h as u32);
        for ((r, c), &v) in image.indexed_iter() {
            let px = if edge[(r, c)] {
                OUTLINE_RGB
            } else {
                let g = window.map_or(0, |win| win.gray(v));
                [g, g, g]
            };
            buf.put_pixel(c as u32, r as u32, Rgb(px));
        }

        if (self.zoom - 1.0).abs() < f64::EPSILON || h == 0 || w == 0 {
            return buf;
        }
        let nw = ((w as f64 * self.zoom).round() as u32).max(1);
        let nh = ((h as f64 * self.zoom).round() as u32).max(1);
        imageops::resize(&buf, nw, nh, FilterType::Nearest)
    }

    /// 渲染并以 PNG 等格式 (由扩展名决定) 保存到 `path`.
    pub fn save<P: AsRef<Path>>(
        &self,
        image: ArrayView2<'_, f32>,
        mask: ArrayView2<'_, u8>,
        path: P,
    ) -> ImageResult<()> {
        self.render(image, mask).save(path)
    }
}
