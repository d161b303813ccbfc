//! filterstack: run annotated GLSL filter pipelines on images.

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use filterstack::config::Config;
use filterstack::files::{self, DiskFiles};
use filterstack::gpu::{WgpuBackend, WgpuTexture};
use filterstack::image_io::ImageFrame;
use filterstack::vfs::SearchRoots;
use filterstack::watch::FileWatcher;
use filterstack::{Node, PixelFormat, Pipeline};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// GPU shader filter pipelines.
#[derive(Parser, Debug)]
#[command(name = "filterstack")]
#[command(about = "Apply chains of annotated GLSL filters to images on the GPU")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Additional shader search directory (may be repeated)
    #[arg(short, long = "root", global = true)]
    roots: Vec<PathBuf>,

    /// Intermediate buffer format: dont_care, rgba8, rgba16, rgba16f, rgba32f
    #[arg(long, global = true, value_parser = parse_format)]
    format: Option<PixelFormat>,

    /// Only render the first N nodes
    #[arg(long, global = true)]
    max_nodes: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render an image through a pipeline file
    Apply(RenderArgs),
    /// Load shaders or pipeline files and report their parameters and errors
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Re-serialize a pipeline file to stdout
    Dump { pipeline: PathBuf },
    /// Like apply, then re-render whenever a shader or the pipeline changes
    Watch(RenderArgs),
}

#[derive(ClapArgs, Debug)]
struct RenderArgs {
    pipeline: PathBuf,
    input: PathBuf,
    output: PathBuf,
}

fn parse_format(s: &str) -> std::result::Result<PixelFormat, String> {
    match s {
        "dont_care" | "auto" => Ok(PixelFormat::DontCare),
        other => PixelFormat::from_annotation(other).ok_or_else(|| format!("unknown pixel format '{other}'")),
    }
}

/// Settings after merging the config file with command-line overrides.
struct Settings {
    roots: SearchRoots,
    format: PixelFormat,
    max_nodes: Option<usize>,
    auto_reload: bool,
}

impl Settings {
    fn new(args: &Args) -> Result<Self> {
        let config = Config::load_or_default(args.config.as_deref())?;
        let roots = SearchRoots::new(config.shader_roots.into_iter().chain(args.roots.iter().cloned()));
        Ok(Self {
            roots,
            format: args.format.unwrap_or(config.format),
            max_nodes: args.max_nodes.or(config.max_nodes),
            auto_reload: config.auto_reload,
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut settings = Settings::new(&args)?;

    match &args.command {
        Command::Apply(render) => run_apply(&mut settings, render),
        Command::Check { files } => run_check(&mut settings, files),
        Command::Dump { pipeline } => run_dump(&mut settings, pipeline),
        Command::Watch(render) => run_watch(&mut settings, render),
    }
}

fn is_pipeline_file(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|t| t.trim_start().starts_with("[filterstack]"))
        .unwrap_or(false)
}

/// Replaces the pipeline's contents with `path` and returns the stored show
/// index. The file's directory is searched first while its nodes load.
fn load_pipeline(pipeline: &mut Pipeline<WgpuBackend>, roots: &mut SearchRoots, path: &Path) -> Result<usize> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read pipeline {:?}", path))?;
    let roots = roots.temporary_root(path);
    let show = pipeline
        .unserialize(&text, &*roots)
        .with_context(|| format!("Failed to load pipeline {:?}", path))?;
    info!("Loaded pipeline {:?} with {} nodes", path, pipeline.node_count());
    for node in pipeline.nodes() {
        report_errors(node);
    }
    Ok(show)
}

fn report_errors(node: &Node<WgpuBackend>) {
    if node.errors().is_empty() {
        return;
    }
    if node.is_good() {
        warn!("{}:\n{}", node.name(), node.errors().trim_end());
    } else {
        error!("{} failed to load:\n{}", node.name(), node.errors().trim_end());
    }
}

fn render_to_file(
    pipeline: &mut Pipeline<WgpuBackend>,
    settings: &Settings,
    show: usize,
    source: &WgpuTexture,
    output: &Path,
) -> Result<()> {
    let limit = settings.max_nodes.map_or(show, |m| m.min(show));
    pipeline.render(source, source.width(), source.height(), settings.format, Some(limit));
    info!(
        "Rendered {} of {} nodes in {:?}",
        limit.min(pipeline.node_count()),
        pipeline.node_count(),
        pipeline.last_render_time()
    );
    let result = pipeline.backend().read_back(pipeline.result_texture(source))?;
    result.save(output)
}

fn run_apply(settings: &mut Settings, render: &RenderArgs) -> Result<()> {
    let backend = WgpuBackend::new()?;
    let mut pipeline = Pipeline::new(backend, DiskFiles)?;
    let show = load_pipeline(&mut pipeline, &mut settings.roots, &render.pipeline)?;

    let frame = ImageFrame::load(&render.input)?;
    let source = pipeline.backend().upload_image(&frame);
    render_to_file(&mut pipeline, settings, show, &source, &render.output)?;
    info!("Saved {:?}", render.output);
    Ok(())
}

fn run_watch(settings: &mut Settings, render: &RenderArgs) -> Result<()> {
    let backend = WgpuBackend::new()?;
    let mut pipeline = Pipeline::new(backend, DiskFiles)?;
    let mut show = load_pipeline(&mut pipeline, &mut settings.roots, &render.pipeline)?;
    let mut document = files::fingerprint(&render.pipeline);

    let frame = ImageFrame::load(&render.input)?;
    let source = pipeline.backend().upload_image(&frame);

    loop {
        if let Err(e) = render_to_file(&mut pipeline, settings, show, &source, &render.output) {
            error!("Render error: {:#}", e);
        }

        let mut watched: Vec<PathBuf> = pipeline.nodes().iter().map(|n| n.path().to_path_buf()).collect();
        watched.push(render.pipeline.clone());
        let watcher = FileWatcher::new(watched.iter().map(PathBuf::as_path))?;
        while !watcher.wait(Duration::from_millis(500)) {}
        // let editors finish writing before reading
        std::thread::sleep(Duration::from_millis(100));
        watcher.check_for_changes();

        let current = files::fingerprint(&render.pipeline);
        if current != document {
            document = current;
            match load_pipeline(&mut pipeline, &mut settings.roots, &render.pipeline) {
                Ok(s) => show = s,
                Err(e) => error!("{:#}", e),
            }
            continue;
        }

        pipeline.reload_all(!settings.auto_reload);
        for node in pipeline.nodes() {
            report_errors(node);
        }
    }
}

fn run_check(settings: &mut Settings, files: &[PathBuf]) -> Result<()> {
    let backend = WgpuBackend::new()?;
    let mut pipeline = Pipeline::new(backend, DiskFiles)?;
    let mut failed = 0;

    for path in files {
        if is_pipeline_file(path) {
            load_pipeline(&mut pipeline, &mut settings.roots, path)?;
        } else {
            pipeline.clear();
            pipeline.add_node(path, None);
        }
        for node in pipeline.nodes() {
            print_node(node);
            if !node.is_good() {
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} node(s) failed to load", failed);
    }
    Ok(())
}

fn print_node(node: &Node<WgpuBackend>) {
    println!("{} ({})", node.name(), node.path().display());
    println!("  passes: {}", node.pass_count());
    for p in node.params() {
        let n = p.ty().components();
        let default = p.default_value()[..n]
            .iter()
            .map(|v| p.format_value(*v))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {} : {:?} [{} .. {}] = {}  {}",
            p.name(),
            p.ty(),
            p.format_value(p.min_value()),
            p.format_value(p.max_value()),
            default,
            p.desc()
        );
    }
    for line in node.errors().lines() {
        println!("  {}", line);
    }
}

fn run_dump(settings: &mut Settings, path: &Path) -> Result<()> {
    let backend = WgpuBackend::new()?;
    let mut pipeline = Pipeline::new(backend, DiskFiles)?;
    let show = load_pipeline(&mut pipeline, &mut settings.roots, path)?;
    let roots = settings.roots.temporary_root(path);
    print!("{}", pipeline.serialize(show, &*roots));
    Ok(())
}
