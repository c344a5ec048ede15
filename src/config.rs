use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::snapshot::StorePaths;

/// ResNet-50 去掉分类层后的输出维度
pub const EMBEDDING_DIM: usize = 2048;
/// 模型输入的正方形边长
pub const INPUT_SIZE: u32 = 224;
/// ImageNet 训练集的通道均值
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet 训练集的通道标准差
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs =
        ProjectDirs::from("", "coversearch", "coversearch").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".")
}

#[derive(Parser, Debug, Clone)]
pub struct ExtractorOptions {
    /// ONNX 模型路径，默认为配置目录下的 resnet50.onnx
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,
    /// 特征向量维度，必须与模型输出一致
    #[arg(long, value_name = "N", default_value_t = EMBEDDING_DIM)]
    pub dimension: usize,
    /// 模型输入尺寸，图片会先缩放短边再居中裁剪为正方形
    #[arg(long, value_name = "SIZE", default_value_t = INPUT_SIZE)]
    pub input_size: u32,
    /// 各通道归一化均值
    #[arg(long, value_name = "R,G,B", default_value = "0.485,0.456,0.406", value_parser = parse_triplet)]
    pub mean: [f32; 3],
    /// 各通道归一化标准差
    #[arg(long = "std", value_name = "R,G,B", default_value = "0.229,0.224,0.225", value_parser = parse_std)]
    pub std_dev: [f32; 3],
    /// 推理线程数，0 表示由 onnxruntime 决定
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub threads: usize,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            model: None,
            dimension: EMBEDDING_DIM,
            input_size: INPUT_SIZE,
            mean: IMAGENET_MEAN,
            std_dev: IMAGENET_STD,
            threads: 0,
        }
    }
}

impl ExtractorOptions {
    /// 模型文件路径，未指定时使用配置目录下的默认模型
    pub fn model_path(&self, conf_dir: &ConfDir) -> PathBuf {
        self.model.clone().unwrap_or_else(|| conf_dir.model())
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 返回的最相似专辑数量
    #[arg(short, value_name = "K", default_value_t = 10)]
    pub k: usize,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "coversearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// coversearch 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 登记专辑目录中的新专辑，并把封面特征加入索引
    Add(AddCommand),
    /// 搜索与图片最相似的专辑
    Search(SearchCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
    /// 显示索引与元数据的统计信息
    Show(ShowCommand),
    /// 修复写入中断后索引末尾多出的向量
    Repair(RepairCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回向量索引文件的路径
    pub fn index(&self) -> PathBuf {
        self.path.join("index.bin")
    }

    /// 返回元数据文件的路径
    pub fn metadata(&self) -> PathBuf {
        self.path.join("metadata.json")
    }

    /// 返回默认模型文件的路径
    pub fn model(&self) -> PathBuf {
        self.path.join("resnet50.onnx")
    }

    pub fn store_paths(&self) -> StorePaths {
        StorePaths { index: self.index(), metadata: self.metadata() }
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

fn parse_triplet(s: &str) -> anyhow::Result<[f32; 3]> {
    let parts = s.split(',').map(|p| p.trim().parse::<f32>()).collect::<Result<Vec<_>, _>>()?;
    match parts[..] {
        [r, g, b] => Ok([r, g, b]),
        _ => Err(anyhow::anyhow!("需要三个以逗号分隔的数值: {}", s)),
    }
}

/// 标准差作为除数，必须为正的有限值
fn parse_std(s: &str) -> anyhow::Result<[f32; 3]> {
    let std = parse_triplet(s)?;
    if std.iter().any(|v| !v.is_finite() || *v <= 0.0) {
        return Err(anyhow::anyhow!("标准差必须为正数: {}", s));
    }
    Ok(std)
}
