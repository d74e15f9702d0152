use anyhow::{Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use wavetrace::world_file::DEFAULT_PRECISION;
use wavetrace::{
    collect_overlay_sources, register_sources, GeoRegistrar, OverlaySource, RegistrationOptions,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 入力KMLファイル、KMZファイル、またはディレクトリ
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// 出力ディレクトリ
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// 並列処理スレッド数（デフォルト: CPUコア数）
    #[arg(short, long)]
    threads: Option<usize>,

    /// ワールドファイルの仮数部の桁数（6でprintfの%eと同じ）
    #[arg(long, default_value_t = DEFAULT_PRECISION)]
    precision: usize,

    /// .aux.xmlを出力しない
    #[arg(long)]
    no_aux: bool,

    /// GeoTIFFも出力
    #[arg(long)]
    geotiff: bool,

    /// GeoTIFFのNoData値
    #[arg(long, requires = "geotiff")]
    nodata: Option<f64>,
}

impl Args {
    fn registration_options(&self) -> RegistrationOptions {
        RegistrationOptions {
            precision: self.precision,
            write_aux_xml: !self.no_aux,
            write_geotiff: self.geotiff,
            nodata: self.nodata,
        }
    }
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt::init();

    // CLI引数の解析
    let args = Args::parse();

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    // スレッドプールの設定
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build thread pool")?;
    }

    // 出力ディレクトリの作成
    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory {:?}", args.output))?;

    // 入力パスの処理
    let (sources, input_root) = if args.input.is_file() {
        match OverlaySource::from_path(&args.input) {
            Some(source) => {
                info!("Processing file: {:?}", args.input);
                let parent = args.input.parent().unwrap_or_else(|| Path::new(""));
                (vec![source], parent.to_path_buf())
            }
            None => {
                error!("Unsupported file type: {:?}", args.input);
                anyhow::bail!("Input file must be .kml or .kmz");
            }
        }
    } else if args.input.is_dir() {
        info!("Processing directory: {:?}", args.input);
        let sources = collect_overlay_sources(&args.input)?;
        info!("Found {} input files (KML/KMZ)", sources.len());
        (sources, args.input.clone())
    } else {
        error!("Invalid input path: {:?}", args.input);
        anyhow::bail!("Input path must be a file or directory");
    };

    let registrar = GeoRegistrar::new(args.registration_options());
    // ソースごとに入力ツリーと同じ構成の出力ディレクトリへ書き出す
    let report = register_sources(&sources, &input_root, &args.output, &registrar);

    info!("Registered {} images", report.registered.len());

    // エラーをチェック
    if !report.is_success() {
        error!("Failed to register {} images:", report.failures.len());
        for failure in &report.failures {
            error!("  {}", failure);
        }
        anyhow::bail!("{} images failed to register", report.failures.len());
    }

    // 処理時間を表示
    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    Ok(())
}
