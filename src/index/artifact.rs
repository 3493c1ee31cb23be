use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info, warn};

use super::{FlatIndex, Metric};
use crate::error::{Error, Result};

const MAGIC: &[u8; 6] = b"VITIDX";
const VERSION: u16 = 1;

/// 索引文件头
///
/// 头部记录了映射文件的数量和 blake3 校验和，加载时用于检查两个文件是否配套
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHeader {
    pub metric: Metric,
    pub dimension: usize,
    pub count: usize,
    pub mapping_digest: [u8; 32],
}

impl IndexHeader {
    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_u16::<LittleEndian>(VERSION)?;
        w.write_u8(self.metric.tag())?;
        w.write_u32::<LittleEndian>(self.dimension as u32)?;
        w.write_u64::<LittleEndian>(self.count as u64)?;
        w.write_all(&self.mapping_digest)?;
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 6];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::CorruptArtifact("不是 vitsearch 索引文件".into()));
        }
        let version = r.read_u16::<LittleEndian>()?;
        if version != VERSION {
            return Err(Error::CorruptArtifact(format!("不支持的索引版本: {version}")));
        }
        let metric = Metric::from_tag(r.read_u8()?)?;
        let dimension = r.read_u32::<LittleEndian>()? as usize;
        let count = r.read_u64::<LittleEndian>()? as usize;
        let mut mapping_digest = [0u8; 32];
        r.read_exact(&mut mapping_digest)?;
        if dimension == 0 {
            return Err(Error::CorruptArtifact("索引维度为 0".into()));
        }
        Ok(Self { metric, dimension, count, mapping_digest })
    }
}

impl FlatIndex {
    /// 将索引写入流，向量以小端序 f32 存放
    pub fn write_to<W: Write>(&self, w: &mut W, mapping_digest: [u8; 32]) -> Result<()> {
        let header = IndexHeader {
            metric: self.metric,
            dimension: self.dimension,
            count: self.ntotal(),
            mapping_digest,
        };
        header.write_to(w)?;
        for v in self.raw() {
            w.write_f32::<LittleEndian>(*v)?;
        }
        Ok(())
    }

    /// 从流中读取索引
    pub fn read_from<R: Read>(r: &mut R) -> Result<(Self, IndexHeader)> {
        let header = IndexHeader::read_from(r)?;
        let len = header
            .count
            .checked_mul(header.dimension)
            .ok_or_else(|| Error::CorruptArtifact("向量数量过大".into()))?;
        let bytes = len
            .checked_mul(size_of::<f32>())
            .ok_or_else(|| Error::CorruptArtifact("向量数量过大".into()))?;

        // 头部的数量不可信，按实际读到的字节数分配
        let mut buf = vec![];
        r.by_ref().take(bytes as u64).read_to_end(&mut buf)?;
        if buf.len() != bytes {
            return Err(Error::CorruptArtifact(format!(
                "头部记录 {} 个向量，需要 {} 字节，但文件只有 {} 字节",
                header.count,
                bytes,
                buf.len()
            )));
        }
        let mut data = vec![0f32; len];
        LittleEndian::read_f32_into(&buf, &mut data);
        let index = Self::from_raw(header.dimension, header.metric, data)?;
        Ok((index, header))
    }
}

/// 持久化的索引：向量索引和与之按位置对齐的图片路径列表
#[derive(Debug, Clone)]
pub struct IndexArtifact {
    pub index: FlatIndex,
    pub paths: Vec<String>,
}

/// 加载结果
#[derive(Debug)]
pub struct LoadedArtifact {
    pub artifact: IndexArtifact,
    /// 文件维度与配置维度不同时，记录被采用的文件维度
    pub adopted_dimension: Option<usize>,
}

impl IndexArtifact {
    /// 创建索引产物，要求路径数量与向量数量一致
    pub fn new(index: FlatIndex, paths: Vec<String>) -> Result<Self> {
        if index.ntotal() != paths.len() {
            return Err(Error::InconsistentArtifact(format!(
                "索引包含 {} 个向量，但有 {} 个路径",
                index.ntotal(),
                paths.len()
            )));
        }
        Ok(Self { index, paths })
    }

    /// 将索引和映射分别写入两个文件
    ///
    /// 两个文件都先写入临时文件，全部成功后再重命名
    pub fn save(&self, index_path: &Path, mapping_path: &Path) -> Result<()> {
        let mapping = bincode::serialize(&self.paths)?;
        let digest = *blake3::hash(&mapping).as_bytes();

        let index_tmp = tmp_path(index_path);
        let mapping_tmp = tmp_path(mapping_path);

        let result = self.write_tmp(&index_tmp, &mapping_tmp, &mapping, digest).and_then(|_| {
            std::fs::rename(&mapping_tmp, mapping_path)?;
            std::fs::rename(&index_tmp, index_path)?;
            Ok(())
        });
        if result.is_err() {
            for tmp in [&index_tmp, &mapping_tmp] {
                if tmp.exists() {
                    if let Err(e) = std::fs::remove_file(tmp) {
                        warn!("无法删除临时文件 {}: {e}", tmp.display());
                    }
                }
            }
        }
        result
    }

    fn write_tmp(
        &self,
        index_tmp: &Path,
        mapping_tmp: &Path,
        mapping: &[u8],
        digest: [u8; 32],
    ) -> Result<()> {
        info!("正在保存索引到 {}", index_tmp.display());
        let mut w = BufWriter::new(File::create(index_tmp)?);
        self.index.write_to(&mut w, digest)?;
        w.into_inner().map_err(|e| e.into_error())?.sync_all()?;

        info!("正在保存图片路径映射到 {}", mapping_tmp.display());
        let mut f = File::create(mapping_tmp)?;
        f.write_all(mapping)?;
        f.sync_all()?;
        Ok(())
    }

    /// 加载索引和映射，并检查两者是否一致
    ///
    /// # Arguments
    ///
    /// * `index_path` - 索引文件路径
    /// * `mapping_path` - 映射文件路径
    /// * `dimension` - 配置的向量维度，与文件不符时使用文件中的维度
    pub fn load(index_path: &Path, mapping_path: &Path, dimension: usize) -> Result<LoadedArtifact> {
        if !index_path.exists() {
            return Err(Error::MissingArtifact { kind: "索引", path: index_path.to_path_buf() });
        }
        if !mapping_path.exists() {
            return Err(Error::MissingArtifact { kind: "映射", path: mapping_path.to_path_buf() });
        }

        debug!("正在从 {} 加载索引", index_path.display());
        let mut r = BufReader::new(File::open(index_path)?);
        let (index, header) = FlatIndex::read_from(&mut r)?;

        debug!("正在从 {} 加载图片路径映射", mapping_path.display());
        let mapping = std::fs::read(mapping_path)?;
        if *blake3::hash(&mapping).as_bytes() != header.mapping_digest {
            return Err(Error::InconsistentArtifact("映射文件校验和与索引记录不符".into()));
        }
        let paths: Vec<String> = bincode::deserialize(&mapping)?;
        let artifact = Self::new(index, paths)?;

        let adopted_dimension = if header.dimension != dimension {
            warn!(
                "加载的索引维度 ({}) 与期望维度 ({}) 不符，将使用加载的维度",
                header.dimension, dimension
            );
            Some(header.dimension)
        } else {
            None
        };

        info!(
            "索引加载成功：{} 个向量，维度 {}，度量 {}",
            artifact.index.ntotal(),
            artifact.index.dimension(),
            artifact.index.metric()
        );
        Ok(LoadedArtifact { artifact, adopted_dimension })
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|s| s.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
