#![warn(missing_docs)] // <= 合适时移除它.

//! 病灶掩膜复核核心库. 在三个正交视图中查看 3D 影像与病灶掩膜, 手工修正掩膜,
//! 并以修正后的掩膜在后台重新运行定量分析.
//!
//! 该 crate 只提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 格式转换、分割、特征提取、分类与报告生成的方法学均不在本 crate 内,
//!   它们作为外部协作者, 通过 `pipeline::collab` 中的 trait 接入.
//! 2. 体数据一律按 `[X, Y, Z]` 索引. 显示空间中的坐标以 `(row, col)` 表示.
//! 3. 契约错误 (例如回写切片形状不一致) 会直接 panic, 而用户可恢复的错误总是以 `Result` 返回.
//!
//! # 开发计划
//!
//! ### 显示投影与精确逆变换 ✅
//!
//! 每个视图方向上先旋转再镜像, 逆变换先撤销镜像再撤销旋转. 两者都是零拷贝的视图操作.
//!
//! 实现位于 `lesion-berry/src/data/slice/project.rs`.
//!
//! ### 笔画缓冲与栅格化 ✅
//!
//! 笔画是定直径圆盘的并集, 直到应用时才栅格化. 像素中心落在某个圆盘内即视为被覆盖.
//!
//! 实现位于 `lesion-berry/src/edit`.
//!
//! ### 掩膜回写与撤销 ✅
//!
//! 回写前的体平面以 zlib 压缩保存, 用于撤销.
//!
//! ### 后台流水线监督者 ✅
//!
//! 每个类别至多一个运行中的任务, 取消先协作后强制, 临时文件在任何结局下都会被删除.
//!
//! 实现位于 `lesion-berry/src/pipeline`.
//!
//! ### 外部命令协作者 ✅
//!
//! 以配置文件中的命令行程序实现全部协作者, 取消时杀死子进程.
//!
//! ### 叠加渲染 ✅
//!
//! 影像灰度 (最小/最大值归一化或 CT 窗口) 加红色掩膜轮廓, 按缩放倍率放大.
//!
//! ### 批量病例 ⌛️
//!
//! 目前每次运行只处理一个病例.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

pub mod config;
pub mod consts;
pub mod data;
pub mod edit;
pub mod pipeline;
pub mod prelude;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_utils;

pub use data::{CaseVolumes, CtWindow, LoadError, MaskVolume, NiftiHeaderAttr, SliceKey, ViewAxis, Volume};
pub use session::{PipelineInput, Workbench};
