//! 命令行宿主依赖的通用组件.

use lesion_berry::CtWindow;

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 向 `w` 写一条分隔线.
#[inline]
pub fn sep_to<W: std::io::Write>(mut w: W) -> std::io::Result<()> {
    writeln!(&mut w, "{SEP}")
}

/// 创建一般情况下合适的、用于可视化腹部 CT 的窗口.
/// 该窗口窗位为 60, 窗宽为 200.
#[inline]
pub fn abdomen_window() -> CtWindow {
    CtWindow::from_liver_visual()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sep_to_writes_one_line() {
        let mut buf = Vec::new();
        sep_to(&mut buf).unwrap();
        sep_to(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|l| l == SEP));
    }
}
