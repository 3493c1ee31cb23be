use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::builder::TypedValueParser as _;
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;

/// 默认使用的 ViT 模型
pub const DEFAULT_MODEL: &str = "google/vit-base-patch16-224-in21k";
/// 默认模型输出的特征维度
pub const DEFAULT_DIMENSION: usize = 768;
/// 默认返回的结果数量
pub const DEFAULT_COUNT: usize = 5;
/// 默认支持的图片格式
pub const DEFAULT_SUFFIX: &str = "png,jpg,jpeg,bmp,gif";

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "vitsearch", "vitsearch")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    ConfDir { path }
});

#[derive(Parser, Debug, Clone)]
pub struct EmbedderOptions {
    /// 特征提取使用的模型名称
    #[arg(long, value_name = "NAME", default_value = DEFAULT_MODEL)]
    pub model: String,
    /// 模型 ONNX 文件路径，默认为 <CONF_DIR>/models/<模型名>.onnx
    #[arg(long, value_name = "PATH")]
    pub model_path: Option<PathBuf>,
    /// 模型输出的特征维度
    #[arg(long, value_name = "DIM", default_value_t = DEFAULT_DIMENSION)]
    pub dimension: usize,
}

impl EmbedderOptions {
    /// 模型文件的实际路径
    pub fn model_file(&self, conf_dir: &ConfDir) -> PathBuf {
        match &self.model_path {
            Some(path) => path.clone(),
            None => conf_dir.model(&self.model),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 显示的结果数量
    #[arg(short = 'k', long, value_name = "COUNT", default_value_t = DEFAULT_COUNT, value_parser = clap::value_parser!(u16).range(1..=1000).map(usize::from))]
    pub count: usize,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "vitsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// vitsearch 配置文件目录
    #[arg(short, long, global = true, default_value_t = CONF_DIR.clone())]
    pub conf_dir: ConfDir,
    /// 是否尝试使用加速执行环境（GPU 推理、多线程搜索）
    #[arg(long, global = true, value_enum, default_value_t = Acceleration::Auto)]
    pub acceleration: Acceleration,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 提取数据目录中所有图片的特征并构建索引
    Build(BuildCommand),
    /// 搜索与指定图片最相似的图片
    Search(SearchCommand),
    /// 显示索引状态
    Status(StatusCommand),
    /// 启动交互式搜索
    Shell(ShellCommand),
    /// 启动 HTTP 搜索服务
    Serve(ServerCommand),
    /// 导出索引中的所有特征向量
    Export(ExportCommand),
}

/// 执行环境的选择策略
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceleration {
    /// 自动探测，可用时使用加速环境
    Auto,
    /// 始终使用基础环境
    Off,
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回默认的图片数据目录
    pub fn data_dir(&self) -> PathBuf {
        self.path.join("data")
    }

    /// 返回索引目录
    pub fn index_dir(&self) -> PathBuf {
        self.path.join("index")
    }

    /// 返回索引文件的路径
    pub fn index(&self) -> PathBuf {
        self.index_dir().join("image_features.index")
    }

    /// 返回图片路径映射文件的路径
    pub fn mapping(&self) -> PathBuf {
        self.index_dir().join("image_paths.bin")
    }

    /// 返回模型文件的路径，模型名中的组织前缀会被去掉
    pub fn model(&self, name: &str) -> PathBuf {
        let name = name.rsplit('/').next().unwrap_or(name);
        self.path.join("models").join(format!("{name}.onnx"))
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl fmt::Display for ConfDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
