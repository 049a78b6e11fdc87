//! ILB Editor 命令行
//!
//! ```text
//! ilb_editor info <文件>
//! ilb_editor export <文件> <目录>
//! ilb_editor rebuild <输入> <输出>
//! ```
//!
//! 选项：`--gen2` 按第二代格式读取，`--log-dir <目录>` 同时把日志写入文件。

use anyhow::{Context, Result, bail};
use ilb_editor::image::palette::Color;
use ilb_editor::{APP_NAME, APP_VERSION, ContainerVariant, Generation, IlbLibrary, RecordTemplate};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

/// 解析后的命令行
#[derive(Debug, Default)]
struct Options {
    generation: Generation,
    log_dir: Option<PathBuf>,
    positional: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options::default();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--gen2" => options.generation = Generation::Second,
            "--log-dir" => {
                let dir = iter.next().context("--log-dir 缺少目录参数")?;
                options.log_dir = Some(PathBuf::from(dir));
            }
            "--help" | "-h" => options.positional = vec!["help".to_string()],
            other if other.starts_with("--") => bail!("未知选项: {}", other),
            other => options.positional.push(other.to_string()),
        }
    }
    Ok(options)
}

/// 初始化日志，指定目录时同时输出到文件
fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::never(dir, "ilb-editor.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            Registry::default()
                .with(filter)
                .with(console_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            Registry::default().with(filter).with(console_layer).init();
            None
        }
    }
}

fn print_usage() {
    println!("{} {}", APP_NAME, APP_VERSION);
    println!();
    println!("使用方法:");
    println!("  ilb_editor info <文件>             显示图像列表");
    println!("  ilb_editor export <文件> <目录>    导出所有图像为 PNG");
    println!("  ilb_editor rebuild <输入> <输出>   重新生成 V4 文件");
    println!();
    println!("选项:");
    println!("  --gen2             按第二代格式读取");
    println!("  --log-dir <目录>   日志同时写入该目录");
}

fn load(path: &str, generation: Generation) -> Result<IlbLibrary> {
    IlbLibrary::load(Path::new(path), generation, &RecordTemplate::default())
        .with_context(|| format!("打开 {} 失败", path))
}

fn cmd_info(path: &str, generation: Generation) -> Result<()> {
    let library = load(path, generation)?;
    println!(
        "{}: {}, {} 个位置, {} 个图像, {} 个调色板",
        library.file_name,
        library.table.variant.name(),
        library.count(),
        library.table.populated(),
        library.table.palettes.len()
    );
    for (index, id, record) in library.table.iter() {
        println!(
            "{:5} {:<16} {:>4}x{:<4} 偏移 ({}, {}) 背景 {} 子图像 {} '{}'",
            index,
            record.image_type.name(),
            record.width,
            record.height,
            record.x_shift,
            record.y_shift,
            Color::from_rgb888(record.background_color).to_hex_string(),
            library.table.sub_images(id).count(),
            record.name
        );
    }
    Ok(())
}

fn cmd_export(path: &str, dir: &str, generation: Generation) -> Result<()> {
    let library = load(path, generation)?;
    let dir = Path::new(dir);
    std::fs::create_dir_all(dir).with_context(|| format!("创建目录 {:?} 失败", dir))?;

    let indices: Vec<usize> = library.table.iter().map(|(index, _, _)| index).collect();
    let mut exported = 0;
    for index in indices {
        let target = dir.join(format!("{:05}.png", index));
        match library.export_png(index, &target) {
            Ok(()) => exported += 1,
            Err(e) => warn!("图像 {} 导出失败: {}", index, e),
        }
    }
    info!("已导出 {} 个图像到 {:?}", exported, dir);
    Ok(())
}

fn cmd_rebuild(input: &str, output: &str, generation: Generation) -> Result<()> {
    let mut library = load(input, generation)?;
    if !library.table.variant.is_writable() {
        info!("{} 按 {} 重新生成", library.table.variant.name(), ContainerVariant::Gen1V4.name());
        library.table.variant = ContainerVariant::Gen1V4;
    }
    let written = library
        .save(Path::new(output))
        .with_context(|| format!("写入 {} 失败", output))?;
    info!("{} -> {}: {} 字节", input, output, written);
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;
    let _guard = init_logging(options.log_dir.as_deref());

    let positional: Vec<&str> = options.positional.iter().map(String::as_str).collect();
    match positional.as_slice() {
        ["info", file] => cmd_info(file, options.generation),
        ["export", file, dir] => cmd_export(file, dir, options.generation),
        ["rebuild", input, output] => cmd_rebuild(input, output, options.generation),
        _ => {
            print_usage();
            Ok(())
        }
    }
}
