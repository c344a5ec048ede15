use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbImage};
use log::{debug, info};
use ndarray::Array4;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;

use crate::config::ExtractorOptions;
use crate::error::{Error, Result};

/// 一张图片的特征向量
pub type Embedding = Vec<f32>;

/// 把图片映射为固定维度特征向量的特征提取器
///
/// 相同的图片必须得到完全相同的向量，实现需要在多个线程间共享，
/// 因此每次调用只能使用调用内部的缓冲区。
pub trait FeatureExtractor: Send + Sync {
    /// 输出向量的维度
    fn dimension(&self) -> usize;

    /// 计算一张已解码图片的特征向量
    fn embed(&self, image: &DynamicImage) -> Result<Embedding>;

    /// 解码图片字节后计算特征向量
    fn embed_bytes(&self, bytes: &[u8]) -> Result<Embedding> {
        let image = decode_image(bytes)?;
        self.embed(&image)
    }
}

/// 解码任意常见格式的图片
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(bytes).map_err(|e| Error::InvalidImage(e.to_string()))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::InvalidImage("图片尺寸为 0".to_string()));
    }
    Ok(image)
}

/// 把图片转换为模型输入，格式为 NCHW (1, 3, size, size)
///
/// - 转换为 RGB
/// - 尺寸不等于 size x size 时，先把短边缩放到 size，再居中裁剪
/// - 缩放到 [0, 1] 后按通道减均值、除标准差
pub fn preprocess(image: &DynamicImage, opts: &ExtractorOptions) -> Result<Array4<f32>> {
    let size = opts.input_size;
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(Error::InvalidImage("图片尺寸为 0".to_string()));
    }

    let mut rgb = image.to_rgb8();
    if (w, h) != (size, size) {
        debug!("图片尺寸为 {}x{}，缩放至 {}x{}", w, h, size, size);
        rgb = resize_and_center_crop(&rgb, size);
    }

    let mut array = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            array[[0, c, y as usize, x as usize]] = (v - opts.mean[c]) / opts.std_dev[c];
        }
    }
    Ok(array)
}

fn resize_and_center_crop(image: &RgbImage, size: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    // 和 torchvision 的 Resize(int) 一致，长边按比例截断取整
    let (nw, nh) = if w <= h {
        (size, (size as u64 * h as u64 / w as u64) as u32)
    } else {
        ((size as u64 * w as u64 / h as u64) as u32, size)
    };
    let resized = imageops::resize(image, nw, nh, FilterType::Triangle);
    let left = crop_offset(nw, size);
    let top = crop_offset(nh, size);
    imageops::crop_imm(&resized, left, top, size, size).to_image()
}

/// 居中裁剪的起点，与 torchvision 的 CenterCrop 一样按银行家舍入
fn crop_offset(len: u32, size: u32) -> u32 {
    ((len - size) as f32 / 2.0).round_ties_even() as u32
}

/// 基于 ONNX 格式 ResNet-50 主干网络的特征提取器
///
/// 模型需要去掉最后的全连接层，并以推理模式导出，输出为全局池化后的特征图。
/// 权重在构造时加载一次，之后所有调用共享同一个会话。
pub struct ResNetExtractor {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    options: ExtractorOptions,
}

impl ResNetExtractor {
    pub fn open(path: impl AsRef<Path>, options: ExtractorOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Model(format!("模型文件不存在: {}", path.display())));
        }
        info!("加载模型: {}", path.display());
        let start = Instant::now();

        let mut builder = Session::builder()
            .map_err(Error::model)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(Error::model)?;
        if options.threads > 0 {
            builder = builder.with_intra_threads(options.threads).map_err(Error::model)?;
        }
        let session = builder.commit_from_file(path).map_err(Error::model)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| Error::Model("模型没有输入".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| Error::Model("模型没有输出".to_string()))?;

        info!("模型加载完成，耗时 {:.2}s", start.elapsed().as_secs_f32());
        Ok(Self { session: Mutex::new(session), input_name, output_name, options })
    }

}

impl FeatureExtractor for ResNetExtractor {
    fn dimension(&self) -> usize {
        self.options.dimension
    }

    fn embed(&self, image: &DynamicImage) -> Result<Embedding> {
        let input = preprocess(image, &self.options)?;
        let tensor = Tensor::from_array(input).map_err(Error::model)?;

        let embedding = {
            let mut session =
                self.session.lock().map_err(|_| Error::Model("模型会话锁已损坏".to_string()))?;
            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => tensor])
                .map_err(Error::model)?;
            let output = outputs
                .get(&self.output_name)
                .ok_or_else(|| Error::Model(format!("模型没有输出 {}", self.output_name)))?;
            // 输出形状为 (1, D, 1, 1)，直接展平
            let (_, data) = output.try_extract_tensor::<f32>().map_err(Error::model)?;
            data.to_vec()
        };

        if embedding.len() != self.options.dimension {
            return Err(Error::Model(format!(
                "模型输出维度为 {}，配置维度为 {}",
                embedding.len(),
                self.options.dimension
            )));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(Error::Model("特征向量包含非有限值".to_string()));
        }
        Ok(embedding)
    }
}
