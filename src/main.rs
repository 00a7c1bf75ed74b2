use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use s3_facade::{Config, Metadata, ObjectStorage, ObjectStream};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Bucket and object operations against S3-compatible storage.
#[derive(Debug, Parser)]
#[command(name = "s3-facade", version)]
struct Cli {
    /// Region to sign requests for.
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,
    /// Custom endpoint, e.g. http://localhost:9000 for MinIO.
    #[arg(long, global = true, env = "S3_ENDPOINT_URL")]
    endpoint_url: Option<String>,
    /// Use path-style addressing.
    #[arg(long, global = true, env = "S3_FORCE_PATH_STYLE")]
    force_path_style: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List existing buckets.
    ListBuckets,
    /// Create a bucket.
    CreateBucket { bucket: String },
    /// Delete every object in a bucket, then the bucket.
    DeleteBucket { bucket: String },
    /// List every object in a bucket.
    ListObjects { bucket: String },
    /// Upload a local file.
    Put {
        bucket: String,
        key: String,
        file: PathBuf,
        /// Metadata entry as KEY=VALUE; repeatable.
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },
    /// Replace the metadata of an object.
    UpdateMetadata {
        bucket: String,
        key: String,
        /// Metadata entry as KEY=VALUE; repeatable.
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },
    /// Download an object; metadata goes to stderr.
    Get {
        bucket: String,
        key: String,
        /// Write to this file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Issue presigned GET URLs.
    Presign {
        bucket: String,
        #[arg(required = true)]
        keys: Vec<String>,
        /// Validity in minutes.
        #[arg(long, default_value_t = 30)]
        minutes: u64,
    },
    /// Download through a presigned URL.
    Fetch {
        url: Url,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn parse_meta(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    if k.is_empty() {
        return Err(format!("empty metadata key in `{s}`"));
    }
    Ok((k.to_string(), v.to_string()))
}

async fn write_stream(mut stream: ObjectStream, output: Option<PathBuf>) -> anyhow::Result<()> {
    let mut sink: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(
            tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };
    while let Some(chunk) = stream.try_next().await? {
        sink.write_all(&chunk).await?;
    }
    sink.flush().await?;
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config {
        region: cli.region,
        endpoint_url: cli.endpoint_url,
        force_path_style: cli.force_path_style,
    };
    let store = ObjectStorage::new(config)
        .await
        .context("initialising storage client")?;

    match cli.command {
        Command::ListBuckets => {
            for bucket in store.list_buckets().await? {
                match bucket.creation_date {
                    Some(created) => println!("{}\t{}", bucket.name, created.to_rfc3339()),
                    None => println!("{}", bucket.name),
                }
            }
        }
        Command::CreateBucket { bucket } => {
            let created = store.create_bucket(&bucket).await?;
            println!("{}", created.location.unwrap_or(created.name));
        }
        Command::DeleteBucket { bucket } => {
            let deleted = store
                .delete_bucket(&bucket)
                .await
                .with_context(|| format!("deleting bucket {bucket}"))?;
            println!("deleted {bucket} ({deleted} objects)");
        }
        Command::ListObjects { bucket } => {
            for object in store.list_objects(&bucket).await? {
                println!(
                    "{}\t{}\t{}",
                    object.key,
                    object.size.map(|s| s.to_string()).unwrap_or_default(),
                    object.etag.unwrap_or_default()
                );
            }
        }
        Command::Put {
            bucket,
            key,
            file,
            meta,
        } => {
            let receipt = if meta.is_empty() {
                store.put_object(&bucket, &key, file).await?
            } else {
                let metadata: Metadata = meta.into_iter().collect();
                store
                    .put_object_with_metadata(&bucket, &key, file, metadata)
                    .await?
            };
            println!("{}", receipt.etag.unwrap_or_default());
        }
        Command::UpdateMetadata { bucket, key, meta } => {
            store
                .update_metadata(&bucket, &key, meta.into_iter().collect())
                .await?;
        }
        Command::Get {
            bucket,
            key,
            output,
        } => {
            let object = store.get_object(&bucket, &key).await?;
            let mut metadata: Vec<_> = object.metadata.iter().collect();
            metadata.sort();
            for (k, v) in metadata {
                eprintln!("{k}: {v}");
            }
            write_stream(object.body, output).await?;
        }
        Command::Presign {
            bucket,
            keys,
            minutes,
        } => {
            let mut failed = 0;
            for (key, result) in store.presigned_urls(&bucket, &keys, minutes).await {
                match result {
                    Ok(url) => println!("{key}\t{url}"),
                    Err(err) => {
                        eprintln!("{key}\t{err}");
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} keys could not be presigned", keys.len());
            }
        }
        Command::Fetch { url, output } => {
            let stream = store.fetch_presigned_url_data(&url).await?;
            write_stream(stream, output).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_metadata_pairs() {
        assert_eq!(
            parse_meta("Project=HRMS").unwrap(),
            ("Project".to_string(), "HRMS".to_string())
        );
        assert_eq!(
            parse_meta("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta("=x").is_err());
    }

    #[test]
    fn cli_accepts_repeated_meta() {
        let cli = Cli::try_parse_from([
            "s3-facade",
            "put",
            "bucket",
            "File02.txt",
            "/tmp/File02.txt",
            "--meta",
            "Project=HRMS",
            "--meta",
            "Owner=Ahmad",
        ])
        .unwrap();
        match cli.command {
            Command::Put { meta, .. } => assert_eq!(meta.len(), 2),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
