use anyhow::{Context, Result};
use clap::Parser;
use media_ingest::cli::{Args, Commands, CompressArgs};
use media_ingest::constants::{extension_for_mime, INFO_PREFIX, SUCCESS_PREFIX, WARNING_PREFIX};
use media_ingest::engine::FfmpegLoader;
use media_ingest::logging::init_logging;
use media_ingest::utils::{create_percent_bar, create_progress_spinner, format_file_size, print_compression_result};
use media_ingest::{
    get_media_type, ImageCompressor, ImageOptions, MediaPipeline, PipelineOptions, RawMedia,
    StaticPresigner, UploadOptions, Uploader, VideoCompressor, VideoOptions,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let pipeline = MediaPipeline::new(
        ImageCompressor::new(),
        Arc::new(VideoCompressor::new(Arc::new(FfmpegLoader::new(&args.ffmpeg)))),
        Uploader::new(),
    );

    match args.command {
        Commands::Classify { urls } => {
            for url in urls {
                println!("{}\t{}", get_media_type(&url), url);
            }
        }
        Commands::Compress { input, output, options } => {
            compress_file(&pipeline, &input, &output, &options).await?;
        }
        Commands::Upload { input, url, content_type } => {
            upload_file(&input, &url, content_type).await?;
        }
        Commands::Ingest { input, url, options } => {
            ingest_file(&pipeline, &input, &url, &options).await?;
        }
    }

    Ok(())
}

fn pipeline_options(args: &CompressArgs) -> Result<PipelineOptions> {
    let image = ImageOptions::new(
        args.width,
        args.height,
        args.quality.map(|q| q as f32 / 100.0),
    )?;
    let video = VideoOptions::new(args.crf, args.video_width, args.skip_below)?;

    Ok(PipelineOptions {
        image,
        video,
        ..Default::default()
    })
}

fn report_retryable<T>(result: &media_ingest::Result<T>) {
    if let Err(e) = result {
        if e.is_retryable() {
            println!("{}  Transient failure, the upload can be retried", WARNING_PREFIX);
        }
    }
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
}

async fn compress_file(pipeline: &MediaPipeline, input: &Path, output: &Path, args: &CompressArgs) -> Result<()> {
    println!("🗜️  Compressing: {:?}", input);
    println!("📁 Output: {:?}", output);

    let media = RawMedia::from_path(input).await?;
    let (pb, callback) = create_percent_bar("compressing");
    let mut options = pipeline_options(args)?;
    options.on_progress = Some(callback);

    let (media_type, result) = pipeline.compress(&media, &options).await?;
    pb.finish_and_clear();

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create output directory {:?}", parent))?;
    }
    tokio::fs::write(output, &result.blob.data)
        .await
        .with_context(|| format!("Failed to write {:?}", output))?;

    println!("{} Compressed {} as {}", SUCCESS_PREFIX, media_type, result.blob.mime_type);
    print_compression_result(result.original_size, result.compressed_size);

    let produced = extension_for_mime(&result.blob.mime_type);
    let written = output.extension().and_then(|e| e.to_str()).unwrap_or_default();
    if !written.eq_ignore_ascii_case(produced) && !(produced == "jpg" && written.eq_ignore_ascii_case("jpeg")) {
        println!(
            "{}  Output is {} data but the file extension is .{}",
            WARNING_PREFIX, result.blob.mime_type, written
        );
    }

    Ok(())
}

async fn upload_file(input: &Path, url: &str, content_type: Option<String>) -> Result<()> {
    println!("📤 Uploading: {:?}", input);

    let media = RawMedia::from_path(input).await?;
    let content_type = content_type.unwrap_or_else(|| media.mime_type().to_string());
    println!("{} Content-Type: {}", INFO_PREFIX, content_type);
    println!("📊 File size: {}", format_file_size(media.size()));

    let (pb, callback) = create_percent_bar("uploading");
    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());
    let options = UploadOptions::default()
        .with_progress(callback)
        .with_cancel(token);

    let result = Uploader::new()
        .upload(url, &media.to_blob(), &content_type, &options)
        .await;
    pb.finish_and_clear();
    report_retryable(&result);
    result?;

    println!("{} Upload successful!", SUCCESS_PREFIX);
    Ok(())
}

async fn ingest_file(pipeline: &MediaPipeline, input: &Path, url: &str, args: &CompressArgs) -> Result<()> {
    println!("🚀 Ingesting: {:?}", input);

    let spinner = create_progress_spinner("Reading file...");
    let media = RawMedia::from_path(input).await?;
    spinner.finish_and_clear();

    let (pb, callback) = create_percent_bar("processing");
    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());

    let mut options = pipeline_options(args)?;
    options.on_progress = Some(callback);
    options.cancel = Some(token);

    let result = pipeline
        .ingest(&media, &StaticPresigner::new(url), &options)
        .await;
    pb.finish_and_clear();
    report_retryable(&result);
    let outcome = result?;

    println!("{} Upload successful!", SUCCESS_PREFIX);
    print_compression_result(outcome.original_size, outcome.compressed_size);
    println!("🌐 Object URL: {}", outcome.object_url);
    println!("{} Content-Type: {}", INFO_PREFIX, outcome.content_type);

    Ok(())
}
