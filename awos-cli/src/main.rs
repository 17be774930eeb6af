use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use awos::{
    Awos, AwosConfig, ContinuationToken, CopyObjectOptions, HeadOptions, ListObjectOptions,
    ListObjectV2Options, Marker, PutObjectOptions, SignMethod, SignatureUrlOptions,
};

const DEFAULT_CONFIG_PATH: &str = "awos.toml";

const USAGE: &str = "usage: awos [--config PATH] <command> [args]

commands:
  get KEY [META_KEY...]                    write object content to stdout
  put KEY FILE [--content-type T] [--meta K=V]...
  head KEY [--standard]                    print metadata as JSON
  rm KEY...                                delete one or more keys
  cp SRC DST [--meta K=V]...               server-side copy
  ls [PREFIX] [--delimiter D] [--max-keys N] [--marker M] [--v2] [--token T]
  sign KEY [--put] [--expires SECS]        print a presigned URL

The config path may also be set with AWOS_CONFIG.";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Get {
        key: String,
        meta_keys: Vec<String>,
    },
    Put {
        key: String,
        file: PathBuf,
        content_type: Option<String>,
        meta: Vec<(String, String)>,
    },
    Head {
        key: String,
        standard: bool,
    },
    Rm {
        keys: Vec<String>,
    },
    Cp {
        source: String,
        dest: String,
        meta: Vec<(String, String)>,
    },
    Ls {
        prefix: Option<String>,
        delimiter: Option<String>,
        max_keys: Option<u32>,
        marker: Option<String>,
        v2: bool,
        token: Option<String>,
    },
    Sign {
        key: String,
        put: bool,
        expires: Option<u64>,
    },
}

#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_meta(pair: &str) -> anyhow::Result<(String, String)> {
    match pair.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => bail!("--meta expects KEY=VALUE, got '{}'", pair),
    }
}

fn parse_args(args: &[String]) -> anyhow::Result<Invocation> {
    let mut config = None;
    let mut positional = Vec::new();
    let mut flags: Vec<(String, Option<String>)> = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "--content-type" | "--meta" | "--delimiter" | "--max-keys"
            | "--marker" | "--token" | "--expires" => {
                let value = iter
                    .next()
                    .with_context(|| format!("{} requires a value", arg))?;
                if arg == "--config" {
                    config = Some(PathBuf::from(value));
                } else {
                    flags.push((arg.clone(), Some(value.clone())));
                }
            }
            "--standard" | "--v2" | "--put" => flags.push((arg.clone(), None)),
            other if other.starts_with("--") => bail!("unknown option '{}'", other),
            _ => positional.push(arg.clone()),
        }
    }

    let flag = |name: &str| -> Option<String> {
        flags
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.clone())
    };
    let switch = |name: &str| flags.iter().any(|(n, _)| n == name);
    let metas = || -> anyhow::Result<Vec<(String, String)>> {
        flags
            .iter()
            .filter(|(n, _)| n == "--meta")
            .filter_map(|(_, v)| v.as_deref())
            .map(parse_meta)
            .collect()
    };

    let Some((name, rest)) = positional.split_first() else {
        bail!("missing command\n\n{}", USAGE);
    };
    let command = match (name.as_str(), rest) {
        ("get", [key, meta_keys @ ..]) => Command::Get {
            key: key.clone(),
            meta_keys: meta_keys.to_vec(),
        },
        ("put", [key, file]) => Command::Put {
            key: key.clone(),
            file: PathBuf::from(file),
            content_type: flag("--content-type"),
            meta: metas()?,
        },
        ("head", [key]) => Command::Head {
            key: key.clone(),
            standard: switch("--standard"),
        },
        ("rm", keys) if !keys.is_empty() => Command::Rm {
            keys: keys.to_vec(),
        },
        ("cp", [source, dest]) => Command::Cp {
            source: source.clone(),
            dest: dest.clone(),
            meta: metas()?,
        },
        ("ls", [] | [_]) => Command::Ls {
            prefix: rest.first().cloned(),
            delimiter: flag("--delimiter"),
            max_keys: flag("--max-keys")
                .map(|v| v.parse().with_context(|| format!("invalid --max-keys '{}'", v)))
                .transpose()?,
            marker: flag("--marker"),
            v2: switch("--v2"),
            token: flag("--token"),
        },
        ("sign", [key]) => Command::Sign {
            key: key.clone(),
            put: switch("--put"),
            expires: flag("--expires")
                .map(|v| v.parse().with_context(|| format!("invalid --expires '{}'", v)))
                .transpose()?,
        },
        (other, _) => bail!("invalid command line for '{}'\n\n{}", other, USAGE),
    };

    Ok(Invocation { config, command })
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_options(
    content_type: Option<String>,
    meta: Vec<(String, String)>,
) -> PutObjectOptions {
    let mut options = PutObjectOptions::new();
    options.content_type = content_type;
    for (k, v) in meta {
        options = options.meta(k, v);
    }
    options
}

async fn run(client: &Awos, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Get { key, meta_keys } => {
            let object = client
                .get_as_buffer(&key, meta_keys.as_slice())
                .await?
                .with_context(|| format!("object '{}' not found", key))?;
            for (k, v) in &object.meta {
                eprintln!("{}: {}", k, v);
            }
            std::io::stdout().write_all(&object.content)?;
        }
        Command::Put {
            key,
            file,
            content_type,
            meta,
        } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let content_type = content_type.or_else(|| {
                mime_guess::from_path(&file)
                    .first()
                    .map(|m| m.essence_str().to_string())
            });
            let options = write_options(content_type, meta);
            client.put(&key, bytes::Bytes::from(data), &options).await?;
            info!(key = %client.actual_key(&key), content_type = %options.effective_content_type(), "Uploaded");
        }
        Command::Head { key, standard } => {
            let options = HeadOptions {
                with_standard_headers: standard,
            };
            let meta = client
                .head(&key, &options)
                .await?
                .with_context(|| format!("object '{}' not found", key))?;
            print_json(&meta)?;
        }
        Command::Rm { keys } => {
            if let [key] = keys.as_slice() {
                client.del(key).await?;
            } else {
                let failed = client.del_multi(keys.as_slice()).await?;
                if !failed.is_empty() {
                    print_json(&failed)?;
                    bail!("{} of {} keys could not be deleted", failed.len(), keys.len());
                }
            }
        }
        Command::Cp { source, dest, meta } => {
            let options: CopyObjectOptions = write_options(None, meta);
            client.copy(&dest, &source, &options).await?;
        }
        Command::Ls {
            prefix,
            delimiter,
            max_keys,
            marker,
            v2,
            token,
        } => {
            let shard_key = prefix.clone().unwrap_or_default();
            if v2 {
                let options = ListObjectV2Options {
                    prefix,
                    delimiter,
                    max_keys,
                    continuation_token: token.map(ContinuationToken::new),
                };
                print_json(&client.list_details_v2(&shard_key, &options).await?)?;
            } else {
                let options = ListObjectOptions {
                    prefix,
                    marker: marker.map(Marker::new),
                    delimiter,
                    max_keys,
                };
                print_json(&client.list_details(&shard_key, &options).await?)?;
            }
        }
        Command::Sign { key, put, expires } => {
            let options = SignatureUrlOptions {
                method: if put { SignMethod::Put } else { SignMethod::Get },
                expires,
            };
            println!("{}", client.signature_url(&key, &options).await?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{}", USAGE);
        return Ok(());
    }
    let invocation = parse_args(&args)?;

    let config_path = invocation
        .config
        .or_else(|| std::env::var("AWOS_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = AwosConfig::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    let client = Awos::new(&config)?;
    info!(backend = %client.kind(), config = %config_path.display(), "awos client ready");

    run(&client, invocation.command).await
}
