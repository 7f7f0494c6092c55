use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressIterator, ProgressStyle};
use log::{info, warn};
use regex::Regex;
use walkdir::WalkDir;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .expect("invalid progress template")
}

pub fn pb_style_spinner() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} [{elapsed_precise}] {pos} {msg}")
        .expect("invalid progress template")
}

/// 从标准输入读取一行，去除首尾空白，遇到 EOF 时返回空字符串
pub fn read_line(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let v = std::io::stdin()
        .bytes()
        .take_while(|c| c.as_ref().ok() != Some(&b'\n'))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(String::from_utf8(v)?.trim().to_owned())
}

/// 去掉模式开头的 `**/`
///
/// 扫描本身是递归的，`**/*.jpg` 与 `*.jpg` 等价
pub fn file_name_glob(pattern: &str) -> &str {
    let mut pattern = pattern;
    while let Some(rest) = pattern.strip_prefix("**/") {
        pattern = rest;
    }
    pattern
}

/// 将若干文件名通配模式编译为一个正则表达式，匹配时忽略大小写
///
/// 支持 `*` 和 `?`，其余字符按字面匹配
pub fn compile_globs<S: AsRef<str>>(patterns: &[S]) -> Result<Regex, regex::Error> {
    let alternatives = patterns
        .iter()
        .map(|p| file_name_glob(p.as_ref()))
        .filter(|p| !p.is_empty())
        .map(|pattern| {
            let mut re = String::new();
            for c in pattern.chars() {
                match c {
                    '*' => re.push_str(".*"),
                    '?' => re.push('.'),
                    c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
                }
            }
            re
        })
        .collect::<Vec<_>>();
    Regex::new(&format!("(?i)^(?:{})$", alternatives.join("|")))
}

/// 递归扫描目录，返回文件名匹配 `re_name` 的所有文件的绝对路径
///
/// 结果去重并按字典序排序，保证多次运行时批次划分一致
pub fn scan_images(path: impl AsRef<Path>, re_name: &Regex) -> std::io::Result<Vec<PathBuf>> {
    let path = path.as_ref();
    info!("开始扫描目录: {}", path.display());
    // 目录不存在时直接报错，而不是当作没有图片
    std::fs::metadata(path)?;

    let pb = ProgressBar::no_length().with_style(pb_style_spinner());
    let mut entries = WalkDir::new(path)
        .into_iter()
        .progress_with(pb)
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("跳过无法访问的路径: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| re_name.is_match(&entry.file_name().to_string_lossy()))
        .filter_map(|entry| match entry.path().canonicalize() {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("无法解析路径 {}: {}", entry.path().display(), e);
                None
            }
        })
        .collect::<Vec<_>>();

    entries.sort();
    entries.dedup();
    info!("扫描完成，共 {} 张图片", entries.len());
    Ok(entries)
}
