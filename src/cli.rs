use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "media-ingest",
    about = "Compress images and videos and upload them to pre-signed storage URLs",
    long_about = "media-ingest normalises user media before it reaches object storage. \
                  Images are bounded to a maximum size and re-encoded to WebP (falling back to JPEG); \
                  videos are transcoded to H.264/AAC MP4 with ffmpeg. The result is uploaded with a \
                  single PUT to a pre-signed URL.",
    version,
    after_help = "EXAMPLES:\n  \
    media-ingest classify 'https://cdn.example.com/posts/clip.MOV?sig=abc'\n  \
    media-ingest compress photo.jpg photo.webp -w 1920 -q 80\n  \
    media-ingest upload photo.webp 'https://bucket.s3.amazonaws.com/photo.webp?X-Amz-Signature=...'\n  \
    media-ingest ingest clip.mov 'https://bucket.s3.amazonaws.com/clip.mp4?X-Amz-Signature=...' --crf 30"
)]
pub struct Args {
    #[arg(long, global = true, help = "Show debug output")]
    pub verbose: bool,

    #[arg(long, global = true, conflicts_with = "verbose", help = "Only show errors")]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        env = "MEDIA_INGEST_FFMPEG",
        default_value = "ffmpeg",
        help = "ffmpeg binary used for video transcoding"
    )]
    pub ffmpeg: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CompressArgs {
    #[arg(
        short = 'w',
        long,
        help = "Maximum image width in pixels (default: 1920)"
    )]
    pub width: Option<u32>,

    #[arg(
        short = 'H',
        long,
        help = "Maximum image height in pixels (default: 1920)"
    )]
    pub height: Option<u32>,

    #[arg(
        short = 'q',
        long,
        value_parser = clap::value_parser!(u8).range(1..=100),
        help = "Image quality (1-100, default: 80)"
    )]
    pub quality: Option<u8>,

    #[arg(
        long,
        value_parser = clap::value_parser!(u8).range(0..=51),
        help = "Video constant rate factor (0-51, default: 28)",
        long_help = "Lower values give higher quality and larger files."
    )]
    pub crf: Option<u8>,

    #[arg(long, help = "Maximum video width in pixels (default: 1280)")]
    pub video_width: Option<u32>,

    #[arg(
        long,
        help = "Pass MP4 files at or below this many bytes through untouched"
    )]
    pub skip_below: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Report whether URLs or file names refer to images or videos")]
    Classify {
        #[arg(required = true, help = "URLs or file names")]
        urls: Vec<String>,
    },

    #[command(
        about = "Compress a single image or video",
        long_about = "Compress a single image or video file. The media kind is decided by the \
                      input file extension (.mp4, .mov and .webm are videos)."
    )]
    Compress {
        #[arg(help = "Input media file path")]
        input: PathBuf,

        #[arg(help = "Output file path")]
        output: PathBuf,

        #[command(flatten)]
        options: CompressArgs,
    },

    #[command(about = "Upload a file as-is to a pre-signed URL")]
    Upload {
        #[arg(help = "File to upload")]
        input: PathBuf,

        #[arg(help = "Pre-signed PUT URL")]
        url: String,

        #[arg(
            short = 't',
            long,
            help = "Content-Type header (default: inferred from extension)"
        )]
        content_type: Option<String>,
    },

    #[command(
        about = "Compress a file and upload the result to a pre-signed URL",
        long_about = "Run the full pipeline: classify, compress, then upload with a single PUT. \
                      The pre-signed URL must accept the content type the compressor produces \
                      (image/webp, image/jpeg or video/mp4)."
    )]
    Ingest {
        #[arg(help = "Input media file path")]
        input: PathBuf,

        #[arg(help = "Pre-signed PUT URL")]
        url: String,

        #[command(flatten)]
        options: CompressArgs,
    },
}
