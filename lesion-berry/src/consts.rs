//! 通用常量.

/// 单通道颜色与掩膜标签.
pub mod gray {
    /// 掩膜中背景的体素值.
    pub const MASK_BACKGROUND: u8 = 0;

    /// 掩膜中病灶 (前景) 的体素值. 手工 "添加" 时写入该值.
    pub const MASK_LESION: u8 = 1;

    /// 单通道黑色.
    pub const BLACK: u8 = 0b_0000_0000;

    /// 单通道白色.
    pub const WHITE: u8 = 0b_1111_1111;

    /// 像素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, MASK_BACKGROUND)
    }

    /// 像素是否是前景 (任意非零类别)?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        !is_background(p)
    }
}

/// 轮廓线叠加颜色 (RGB).
pub const OUTLINE_RGB: [u8; 3] = [255, 0, 0];

/// 默认画笔直径, 以显示像素为单位.
pub const DEFAULT_BRUSH_DIAMETER: f64 = 10.0;

/// 画笔直径下限.
pub const MIN_BRUSH_DIAMETER: f64 = 5.0;

/// 画笔直径上限.
pub const MAX_BRUSH_DIAMETER: f64 = 50.0;

/// 取消后台任务时, 等待 worker 自行退出的默认时长 (毫秒).
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 100;

/// 标准模式的判定阈值.
pub const STANDARD_THRESHOLD: f64 = 0.5;

/// 高灵敏度模式的判定阈值.
pub const HIGH_SENSITIVITY_THRESHOLD: f64 = 0.3748581;

/// 报告中默认展示的贡献特征个数.
pub const DEFAULT_REPORT_TOP_N: usize = 10;

/// 分类器要求的影像组学特征列, 顺序即分类器输入顺序.
pub const FEATURE_COLUMNS: [&str; 41] = [
    "original_shape_Sphericity",
    "original_glszm_GrayLevelNonUniformity",
    "original_glszm_SmallAreaEmphasis",
    "wavelet-LHL_firstorder_Mean",
    "wavelet-LHL_glcm_Imc2",
    "wavelet-LHH_firstorder_Mean",
    "wavelet-LHH_glszm_ZonePercentage",
    "wavelet-HLH_firstorder_Mean",
    "wavelet-HHH_glcm_Imc1",
    "wavelet-HHH_glcm_Imc2",
    "wavelet-HHH_glcm_InverseVariance",
    "wavelet-HHH_glszm_LowGrayLevelZoneEmphasis",
    "wavelet-HHH_glszm_SmallAreaLowGrayLevelEmphasis",
    "wavelet-LLL_firstorder_Uniformity",
    "wavelet-LLL_glszm_SizeZoneNonUniformityNormalized",
    "log-sigma-1-0-mm-3D_glszm_SmallAreaEmphasis",
    "log-sigma-3-0-mm-3D_glcm_Correlation",
    "log-sigma-3-0-mm-3D_glcm_Imc1",
    "log-sigma-4-0-mm-3D_glcm_Imc1",
    "log-sigma-4-0-mm-3D_glcm_MaximumProbability",
    "log-sigma-4-0-mm-3D_gldm_DependenceNonUniformityNormalized",
    "log-sigma-5-0-mm-3D_firstorder_Maximum",
    "log-sigma-5-0-mm-3D_glcm_Id",
    "log-sigma-5-0-mm-3D_glcm_InverseVariance",
    "log-sigma-5-0-mm-3D_glrlm_RunLengthNonUniformity",
    "log-sigma-5-0-mm-3D_glszm_SizeZoneNonUniformityNormalized",
    "log-sigma-5-0-mm-3D_gldm_DependenceNonUniformityNormalized",
    "square_glszm_GrayLevelNonUniformity",
    "square_glszm_SizeZoneNonUniformity",
    "square_glszm_ZoneVariance",
    "squareroot_glszm_SizeZoneNonUniformityNormalized",
    "logarithm_glcm_Imc2",
    "logarithm_glszm_LargeAreaHighGrayLevelEmphasis",
    "logarithm_glszm_SizeZoneNonUniformityNormalized",
    "logarithm_glszm_ZoneEntropy",
    "gradient_glcm_Imc1",
    "lbp-3D-m1_firstorder_Mean",
    "lbp-3D-m2_firstorder_Kurtosis",
    "lbp-3D-k_firstorder_Maximum",
    "lbp-3D-k_firstorder_RobustMeanAbsoluteDeviation",
    "lbp-3D-k_ngtdm_Busyness",
];
