//! Session controller: resolves the configuration, owns every acquired
//! resource (model, context, batch, sampler, stream writer), and drives
//! either the single-shot path or the serve loop.

use std::io::{self, BufReader, IsTerminal, Read, Write};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use nox_abi::{BackendConfig, ModelBackend};
use nox_core::chat::{build_chatml, resolve_system};
use nox_core::config::auto_warmup;
use nox_core::engine::{Engine, EngineOptions};
use nox_core::serve::{serve_loop, ServeOptions};
use nox_core::stats::{round_ms, RunStats};
use nox_core::StreamWriter;

use crate::cli::Args;
use crate::warmup;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("NOX_LOG").unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

pub fn run<B: ModelBackend>(supports_mlock: fn() -> bool) -> ExitCode {
    init_tracing();
    let args = Args::parse();
    let cfg = args.to_config();

    // Single-shot prompt acquisition happens before the model load so a
    // missing prompt fails fast.
    let mut prompt = String::new();
    if !cfg.serve {
        prompt = args.prompt_text();
        if prompt.is_empty() && !io::stdin().is_terminal() {
            let mut piped = String::new();
            if io::stdin().read_to_string(&mut piped).is_ok() {
                prompt = piped.trim().to_string();
            }
        }
        if prompt.is_empty() {
            if cfg.state_load.is_none() {
                eprintln!("provide a prompt via args or stdin");
            } else {
                eprintln!("provide a prompt or use --serve with --state-load");
            }
            return ExitCode::FAILURE;
        }
    }

    let system_text = resolve_system(&cfg.system, cfg.chat, cfg.cot);

    eprintln!(
        "loading model: {} (threads={} ctx={} batch={})",
        cfg.model_path.display(),
        cfg.threads,
        cfg.ctx_length,
        cfg.batch_size
    );

    let (auto_prefetch, auto_prepack) = auto_warmup(&cfg.model_path);
    let prefetch_on = cfg
        .prefetch
        .resolve(std::env::var("NOX_PREFETCH").ok().as_deref(), auto_prefetch);
    let prepack_on = cfg
        .prepack
        .resolve(std::env::var("NOX_PREPACK").ok().as_deref(), auto_prepack);
    tracing::debug!(prefetch_on, prepack_on, "warmup resolved");

    if prepack_on {
        if supports_mlock() {
            eprintln!("prepack: mlock enabled");
        } else {
            eprintln!("prepack: mlock not supported on this device");
        }
    }
    if prefetch_on {
        if let Err(e) = warmup::prefetch_model(&cfg.model_path) {
            eprintln!("prefetch failed: {e}");
        }
    }

    let backend_cfg = BackendConfig {
        model_path: cfg.model_path.clone(),
        ctx_length: cfg.ctx_length,
        batch_size: cfg.batch_size,
        threads: cfg.threads,
        use_mlock: prepack_on,
        sampling: cfg.sampling.clone(),
    };
    let mut backend = match B::open(&backend_cfg) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let loaded_tokens = match &cfg.state_load {
        Some(path) => match backend.state_load_file(path, cfg.ctx_length) {
            Ok(tokens) => tokens,
            Err(e) => {
                eprintln!("failed to load state: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Vec::new(),
    };

    // A restored session with no cache mode chosen can only mean append:
    // the loaded tokens are already resident.
    let mut append = cfg.append;
    if !loaded_tokens.is_empty() && !append && !cfg.keep_cache {
        append = true;
    }

    let mut engine = Engine::new(
        backend,
        EngineOptions {
            max_tokens: cfg.max_tokens,
            kv_window: cfg.kv_window,
            raw: cfg.raw,
        },
    );
    let stdout = io::stdout();
    let mut out = StreamWriter::new(stdout.lock(), cfg.stream_bytes);
    let mut stderr = io::stderr();
    let mut metrics: Option<&mut dyn Write> = if cfg.metrics {
        Some(&mut stderr)
    } else {
        None
    };

    if cfg.serve {
        if cfg.chat_active() {
            eprintln!("note: --chat/--cot/--system are not applied in --serve mode");
        }
        let opts = ServeOptions {
            raw: cfg.raw,
            use_rs: cfg.serve_rs,
            keep_cache: cfg.keep_cache,
            append,
            input_only: cfg.input_only,
            state_save: cfg.state_save.clone(),
            kv_window: cfg.kv_window,
        };
        let stdin = io::stdin();
        let reader = BufReader::new(stdin.lock());
        if let Err(e) = serve_loop(&mut engine, reader, &mut out, &opts, loaded_tokens, metrics) {
            eprintln!("serve loop failed: {e}");
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    let prompt = if cfg.chat_active() {
        build_chatml(&system_text, &prompt)
    } else {
        prompt
    };

    let start = Instant::now();
    let mut stats = RunStats::default();
    let stats_opt = if cfg.bench { Some(&mut stats) } else { None };
    if let Err(e) = engine.run_single(
        &prompt,
        &loaded_tokens,
        &mut out,
        stats_opt,
        cfg.state_save.as_deref(),
        metrics.as_deref_mut(),
    ) {
        eprintln!("inference failed: {e}");
        return ExitCode::FAILURE;
    }

    if !cfg.raw {
        let _ = out.flush();
        let _ = out.write_passthrough(b"\n");
        let _ = out.flush();
        eprintln!("\ncompleted in {:?}", round_ms(start.elapsed()));
    }
    if cfg.bench {
        eprintln!("{}", stats.bench_line());
    }
    ExitCode::SUCCESS
}
