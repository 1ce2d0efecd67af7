//! 强度到灰度的映射窗口.

/// 强度窗口, 由窗位 (level) 和窗宽 (width) 描述, 窗内强度线性映射到 `[0, 255]`.
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CtWindow {
    level: f32,
    width: f32,
}

impl CtWindow {
    /// 构建窗口.
    ///
    /// `level` 和 `width` 必须有限且 `width > 0`, 否则返回 `None`.
    pub fn new(level: f32, width: f32) -> Option<CtWindow> {
        if level.is_finite() && width.is_finite() && width > 0.0 {
            Some(Self { level, width })
        } else {
            None
        }
    }

    /// 以 `[min, max]` 为窗. 区间退化 (`min >= max`) 或含非有限值时返回 `None`.
    pub fn from_range(min: f32, max: f32) -> Option<CtWindow> {
        if min.is_finite() && max.is_finite() && min < max {
            Self::new((min + max) / 2.0, max - min)
        } else {
            None
        }
    }

    /// 以 `values` 中有限值的最小值与最大值为窗, 即 min-max 归一化.
    ///
    /// 没有有限值或所有值相同时返回 `None`.
    pub fn from_extremes<'a, I>(values: I) -> Option<CtWindow>
    where
        I: IntoIterator<Item = &'a f32>,
    {
        let (lo, hi) = values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        Self::from_range(lo, hi)
    }

    /// 便于展示腹部软组织的窗口. 窗位 60, 窗宽 200.
    #[inline]
    pub const fn from_liver_visual() -> CtWindow {
        Self {
            level: 60.0,
            width: 200.0,
        }
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.level - self.width / 2.0
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.level + self.width / 2.0
    }

    /// 窗位.
    #[inline]
    pub fn level(&self) -> f32 {
        self.level
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    /// 求 `value` 对应的灰度值 (`0.0 ..= 255.0`). 非有限值返回 `None`.
    pub fn eval_f32(&self, value: f32) -> Option<f32> {
        if !value.is_finite() {
            return None;
        }
        let t = (value - self.lower_bound()) / self.width;
        Some(t.clamp(0.0, 1.0) * 255.0)
    }

    /// 求 `value` 对应的灰度像素值. 非有限值返回 `None`.
    #[inline]
    pub fn eval(&self, value: f32) -> Option<u8> {
        // 截断而非四舍五入, 窗上限处恰为 255.
        self.eval_f32(value).map(|g| g as u8)
    }

    /// 同 [`CtWindow::eval`], 但将非有限值映射为黑色.
    #[inline]
    pub fn gray(&self, value: f32) -> u8 {
        self.eval(value).unwrap_or(u8::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::CtWindow;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_window_invalid_input() {
        assert!(CtWindow::new(0.0, -1.0).is_none());
        assert!(CtWindow::new(0.0, 0.0).is_none());
        assert!(CtWindow::new(f32::NAN, 10.0).is_none());
        assert!(CtWindow::from_range(3.0, 3.0).is_none());
        assert!(CtWindow::from_extremes(&[f32::NAN, 2.0, 2.0]).is_none());
    }

    #[test]
    fn test_window_generic() {
        // [60, 100]
        let w = CtWindow::new(80.0, 40.0).unwrap();
        assert_eq!(w.eval(f32::NAN), None);
        assert_eq!(w.gray(f32::NAN), 0);
        assert_eq!(w.eval(f32::MIN), Some(0));
        assert_eq!(w.eval(f32::MAX), Some(255));

        assert_eq!(w.eval(60.0), Some(0));
        assert_eq!(w.eval(60.1), Some(0));
        assert!(w.eval_f32(60.1).unwrap() > 0.0);

        assert_eq!(w.eval(70.0).unwrap(), (255.0 * 0.25) as u8);
        assert!(float_eq(w.eval_f32(80.0).unwrap(), 255.0 * 0.5));

        assert_eq!(w.eval(99.999), Some(254));
        assert_eq!(w.eval(100.0), Some(255));
    }

    #[test]
    fn test_window_from_extremes() {
        let values = [-5.0, f32::INFINITY, 15.0, 5.0];
        let w = CtWindow::from_extremes(&values).unwrap();
        assert!(float_eq(w.lower_bound(), -5.0));
        assert!(float_eq(w.upper_bound(), 15.0));
        assert_eq!(w.eval(-5.0), Some(0));
        assert_eq!(w.eval(15.0), Some(255));
        assert_eq!(w.eval(5.0), Some(127));
    }
}
