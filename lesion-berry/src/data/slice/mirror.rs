//! 掩膜平面的压缩镜像. 用于撤销一次编辑.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::{Array2, ArrayView2};

use crate::Idx2d;

/// 压缩存储的掩膜体平面; 不透明类型.
///
/// 掩膜平面绝大部分是背景, zlib 压缩后通常只剩几百字节, 适合长期保留在撤销历史中.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactPlane {
    /// 压缩的不透明字节流, 按行优先顺序.
    buf: Vec<u8>,

    /// 形状.
    sh: Idx2d,
}

impl CompactPlane {
    /// 压缩 `plane`.
    pub fn compress(plane: ArrayView2<'_, u8>) -> io::Result<Self> {
        let mut e = ZlibEncoder::new(Vec::with_capacity(64), Compression::fast());
        match plane.as_slice() {
            Some(row_major) => e.write_all(row_major)?,
            None => {
                let buf: Vec<u8> = plane.iter().copied().collect();
                e.write_all(&buf)?;
            }
        }
        Ok(Self {
            buf: e.finish()?,
            sh: plane.dim(),
        })
    }

    /// 形状.
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.sh
    }

    /// 压缩后的字节数.
    #[inline]
    pub fn compressed_len(&self) -> usize {
        self.buf.len()
    }

    /// 解压缩.
    pub fn decompress(&self) -> io::Result<Array2<u8>> {
        let (h, w) = self.sh;
        let mut d = ZlibDecoder::new(self.buf.as_slice());
        let mut buf = Vec::with_capacity(h * w);
        d.read_to_end(&mut buf)?;
        Array2::from_shape_vec((h, w), buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
