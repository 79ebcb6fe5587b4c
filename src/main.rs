use clap::{Parser, ValueEnum};
use paddleocr::{OcrArgs, RecognitionResult, TextSystem};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "paddleocr")]
#[command(about = "PaddleOCR text detection and recognition on ONNX Runtime", long_about = None)]
struct Cli {
    /// JSON file with OcrArgs keys; flags given here take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Detection model directory or .onnx file
    #[arg(long)]
    det_model_dir: Option<PathBuf>,

    /// Recognition model directory or .onnx file
    #[arg(long)]
    rec_model_dir: Option<PathBuf>,

    /// Orientation classifier model directory or .onnx file
    #[arg(long)]
    cls_model_dir: Option<PathBuf>,

    /// Run the 0/180 orientation classifier
    #[arg(long)]
    use_angle_cls: bool,

    /// Character dictionary, one entry per line
    #[arg(long)]
    dict: Option<PathBuf>,

    #[arg(long)]
    use_gpu: bool,

    #[arg(long)]
    gpu_id: Option<i32>,

    /// GPU memory budget in MB
    #[arg(long)]
    gpu_mem: Option<usize>,

    #[arg(long)]
    num_threads: Option<usize>,

    #[arg(long)]
    use_mkldnn: bool,

    /// Discard results scoring below this
    #[arg(long)]
    drop_score: Option<f32>,

    /// Input image path
    image: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OutputFormat {
    /// JSON array of {text, score, bbox}
    Json,
    /// Plain text, one line per region
    Text,
    /// TSV format: text\tscore\tx1,y1,x2,y2,x3,y3,x4,y4
    Tsv,
}

impl Cli {
    fn ocr_args(&self) -> Result<OcrArgs, paddleocr::EngineError> {
        let mut args = match &self.config {
            Some(path) => OcrArgs::from_json_file(path)?,
            None => OcrArgs::default(),
        };

        if let Some(dir) = &self.det_model_dir {
            args.det_model_dir = dir.clone();
        }
        if let Some(dir) = &self.rec_model_dir {
            args.rec_model_dir = dir.clone();
        }
        if let Some(dir) = &self.cls_model_dir {
            args.cls_model_dir = dir.clone();
        }
        if let Some(dict) = &self.dict {
            args.rec_char_dict_path = dict.clone();
        }
        args.use_angle_cls |= self.use_angle_cls;
        args.use_gpu |= self.use_gpu;
        args.use_mkldnn |= self.use_mkldnn;
        if let Some(v) = self.gpu_id {
            args.gpu_id = v;
        }
        if let Some(v) = self.gpu_mem {
            args.gpu_mem = v;
        }
        if let Some(v) = self.num_threads {
            args.num_threads = v;
        }
        if let Some(v) = self.drop_score {
            args.drop_score = v;
        }
        Ok(args)
    }
}

fn print_results(results: &[RecognitionResult], format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results)?);
        }
        OutputFormat::Text => {
            for result in results {
                println!("{}", result.text);
            }
        }
        OutputFormat::Tsv => {
            for result in results {
                let box_str = result
                    .bbox
                    .points
                    .iter()
                    .map(|p| format!("{},{}", p.x, p.y))
                    .collect::<Vec<_>>()
                    .join(",");
                println!("{}\t{:.3}\t{}", result.text, result.score, box_str);
            }
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let args = cli.ocr_args()?;

    let ocr = TextSystem::new(&args)?;
    let results = ocr.run_on_path(&cli.image)?;
    tracing::info!("Recognized {} text regions in {}", results.len(), cli.image.display());

    print_results(&results, cli.format)
}
