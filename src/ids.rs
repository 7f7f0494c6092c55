//! 单列 `photo_id` 表格的读写
//!
//! 文件为 CSV 格式，第一行为表头 `photo_id`，之后每行一个图片标识。
//! 包含逗号、引号或换行的标识使用双引号包裹，内部的引号写作两个双引号。

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

pub const HEADER: &str = "photo_id";

/// 写入标识表
pub fn write_ids<S: AsRef<str>>(path: impl AsRef<Path>, ids: &[S]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "{}", HEADER)?;
    for id in ids {
        write_field(&mut writer, id.as_ref())?;
        writer.write_all(b"\n")?;
    }
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(())
}

fn write_field(writer: &mut impl Write, field: &str) -> std::io::Result<()> {
    // 空字段必须加引号，否则读取时会被当作空行跳过
    if field.is_empty()
        || field.contains([',', '"', '\n', '\r'])
        || field.starts_with(' ')
        || field.ends_with(' ')
    {
        write!(writer, "\"{}\"", field.replace('"', "\"\""))
    } else {
        writer.write_all(field.as_bytes())
    }
}

/// 读取标识表
pub fn read_ids(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let format_error = |reason: String| Error::IdsFormat { path: path.to_owned(), reason };

    let mut records = parse_records(&text).map_err(format_error)?.into_iter();
    match records.next() {
        Some(header) if header == HEADER => Ok(records.collect()),
        Some(header) => Err(format_error(format!("表头应为 {}，实际为 {}", HEADER, header))),
        None => Err(format_error("缺少表头".to_owned())),
    }
}

/// 按行解析单列记录，跳过空行
fn parse_records(text: &str) -> Result<Vec<String>, String> {
    let mut records = vec![];
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() && !quoted => {
                quoted = true;
                in_quotes = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                if quoted || !field.is_empty() {
                    records.push(std::mem::take(&mut field));
                }
                quoted = false;
                line += 1;
            }
            ',' => return Err(format!("第 {} 行包含多于一列", line)),
            _ if quoted => return Err(format!("第 {} 行引号之后存在多余字符", line)),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err("引号未闭合".to_owned());
    }
    if quoted || !field.is_empty() {
        records.push(field);
    }
    Ok(records)
}
