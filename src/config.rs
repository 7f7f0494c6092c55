use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::cli::*;
use crate::utils::file_name_glob;

static DEFAULT_CONFIG: LazyLock<Option<PathBuf>> = LazyLock::new(|| {
    ProjectDirs::from("", "", "clipsearch").map(|dirs| dirs.config_dir().join("config.toml"))
});

#[derive(Parser, Debug, Clone)]
#[command(name = "clipsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 配置文件路径，默认为用户配置目录下的 clipsearch/config.toml
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 计算图片特征并合并为索引，可重复运行，已完成的批次会被跳过
    Process(ProcessCommand),
    /// 仅合并已有的批次特征
    Merge(MergeCommand),
    /// 使用文本搜索图片，不提供查询时进入交互模式
    Search(SearchCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
}

/// 命令行中对配置文件的覆盖项
#[derive(Parser, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// 特征输出目录
    #[arg(long, global = true, value_name = "DIR")]
    pub features_path: Option<PathBuf>,
    /// 图片所在目录
    #[arg(long, global = true, value_name = "DIR")]
    pub photos_path: Option<PathBuf>,
    /// 每个批次的图片数量
    #[arg(long, global = true, value_name = "SIZE")]
    pub batch_size: Option<usize>,
    /// 图片文件名匹配模式，多个模式用逗号分隔，例：`*.jpg,*.png`
    #[arg(long, global = true, value_name = "GLOBS")]
    pub ext_list: Option<String>,
    /// 编码模型，`palette` 或远程编码服务地址
    #[arg(long, global = true, value_name = "MODEL")]
    pub model: Option<String>,
    /// 并行处理的批次数量
    #[arg(long, global = true, value_name = "N")]
    pub workers: Option<usize>,
}

/// 进程启动时加载一次的配置，之后只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// 特征输出目录
    pub features_path: PathBuf,
    /// 图片输入目录
    pub photos_path: PathBuf,
    /// 每个批次的图片数量
    pub batch_size: usize,
    /// 图片文件名匹配模式
    pub ext_list: Vec<String>,
    /// 默认显示的搜索结果数量
    pub display_num: usize,
    /// 编码模型
    pub model: String,
    /// 并行处理的批次数量
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            features_path: PathBuf::from("features"),
            photos_path: PathBuf::from("photos"),
            batch_size: 128,
            ext_list: vec!["*.jpg".into(), "*.jpeg".into(), "*.png".into(), "*.webp".into()],
            display_num: 5,
            model: "palette".into(),
            workers: 1,
        }
    }
}

impl Config {
    /// 读取配置文件并应用命令行覆盖项
    ///
    /// 未显式指定配置文件且默认位置不存在时，使用内置默认值
    pub fn load(opts: &Opts) -> anyhow::Result<Self> {
        let mut config = match &opts.config {
            Some(path) => Self::from_file(path)?,
            None => match DEFAULT_CONFIG.as_deref() {
                Some(path) if path.exists() => Self::from_file(path)?,
                _ => Self::default(),
            },
        };
        config.apply(&opts.overrides);
        config.validate()?;
        debug!("配置: {:?}", config);
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("配置文件格式错误: {}", path.display()))
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(path) = &overrides.features_path {
            self.features_path = path.clone();
        }
        if let Some(path) = &overrides.photos_path {
            self.photos_path = path.clone();
        }
        if let Some(size) = overrides.batch_size {
            self.batch_size = size;
        }
        if let Some(list) = &overrides.ext_list {
            self.ext_list = list.split(',').map(|s| s.trim().to_owned()).collect();
        }
        if let Some(model) = &overrides.model {
            self.model = model.clone();
        }
        if let Some(workers) = overrides.workers {
            self.workers = workers;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size 必须大于 0");
        }
        if self.display_num == 0 {
            bail!("display_num 必须大于 0");
        }
        if self.workers == 0 {
            bail!("workers 必须大于 0");
        }
        if self.ext_list.iter().all(|s| s.is_empty()) {
            bail!("ext_list 不能为空");
        }
        // 模式只匹配文件名，带目录的模式永远匹配不到任何文件
        if let Some(pattern) = self.ext_list.iter().find(|s| file_name_glob(s).contains('/')) {
            bail!("ext_list 中的模式只能匹配文件名: {}", pattern);
        }
        Ok(())
    }

    pub fn features_dir(&self) -> FeaturesDir {
        FeaturesDir::new(&self.features_path)
    }
}

/// 特征目录中各个文件的路径
#[derive(Debug, Clone)]
pub struct FeaturesDir {
    path: PathBuf,
}

impl FeaturesDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 批次编号，固定 10 位，保证字典序与数值顺序一致
    pub fn batch_name(batch: usize) -> String {
        format!("{:010}", batch)
    }

    /// 返回批次特征文件路径
    pub fn batch_features(&self, batch: usize) -> PathBuf {
        self.path.join(format!("{}.npy", Self::batch_name(batch)))
    }

    /// 返回批次标识文件路径
    pub fn batch_ids(&self, batch: usize) -> PathBuf {
        self.path.join(format!("{}.csv", Self::batch_name(batch)))
    }

    /// 返回批次清单文件路径
    pub fn batch_manifest(&self, batch: usize) -> PathBuf {
        self.path.join(format!("{}.json", Self::batch_name(batch)))
    }

    /// 返回批次锁文件路径
    pub fn batch_lock(&self, batch: usize) -> PathBuf {
        self.path.join(format!("{}.lock", Self::batch_name(batch)))
    }

    /// 返回目录元数据文件路径
    pub fn meta(&self) -> PathBuf {
        self.path.join("meta.json")
    }

    /// 返回合并后的特征文件路径
    pub fn features(&self) -> PathBuf {
        self.path.join("features.npy")
    }

    /// 返回合并后的标识文件路径
    pub fn photo_ids(&self) -> PathBuf {
        self.path.join("photo_ids.csv")
    }
}

/// 返回文件写入时使用的临时路径，写完后再 rename 到正式路径
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_paths_are_zero_padded() {
        let dir = FeaturesDir::new("/data/features");
        assert_eq!(dir.batch_features(3), PathBuf::from("/data/features/0000000003.npy"));
        assert_eq!(dir.batch_ids(12), PathBuf::from("/data/features/0000000012.csv"));
        assert_eq!(FeaturesDir::batch_name(1234567890), "1234567890");
    }

    #[test]
    fn tmp_path_keeps_extension() {
        let path = tmp_path(Path::new("/a/0000000001.npy"));
        assert_eq!(path, PathBuf::from("/a/0000000001.npy.tmp"));
    }

    #[test]
    fn parse_config_file() {
        let config: Config = toml::from_str(
            r#"
            features_path = "out"
            photos_path = "in"
            batch_size = 2
            ext_list = ["*.jpg"]
            display_num = 3
            model = "palette"
            "#,
        )
        .unwrap();
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.workers, 1);
        assert_eq!(config.ext_list, vec!["*.jpg".to_string()]);
    }

    #[test]
    fn overrides_take_precedence() {
        let mut config = Config::default();
        config.apply(&ConfigOverrides {
            batch_size: Some(7),
            ext_list: Some("*.png, *.gif".into()),
            ..Default::default()
        });
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.ext_list, vec!["*.png".to_string(), "*.gif".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn ext_list_must_match_file_names() {
        let config = Config { ext_list: vec!["**/*.jpg".into()], ..Default::default() };
        assert!(config.validate().is_ok());
        let config = Config { ext_list: vec!["albums/*.jpg".into()], ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_zero_batch_size() {
        let config = Config { batch_size: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
