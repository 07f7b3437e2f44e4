// Build llama.cpp statically via CMake and generate bindings with bindgen.
// Expects a llama.cpp checkout at `crates/backends/llama/llama-sys/llama.cpp`
// (git submodule). CPU backend only; the runner has no GPU scheduling of its
// own.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use cmake::Config;
use glob::glob;
use walkdir::DirEntry;

#[derive(Clone, Copy)]
enum TargetOs {
    WindowsMsvc,
    WindowsOther,
    MacOs,
    AppleOther,
    Linux,
}

fn parse_target_os() -> Result<(TargetOs, String), String> {
    let target = env::var("TARGET").unwrap();
    if target.contains("windows") {
        if target.ends_with("-windows-msvc") {
            Ok((TargetOs::WindowsMsvc, target))
        } else {
            Ok((TargetOs::WindowsOther, target))
        }
    } else if target.contains("apple") {
        if target.ends_with("-apple-darwin") {
            Ok((TargetOs::MacOs, target))
        } else {
            Ok((TargetOs::AppleOther, target))
        }
    } else if target.contains("linux") {
        Ok((TargetOs::Linux, target))
    } else {
        Err(target)
    }
}

fn is_hidden(e: &DirEntry) -> bool {
    e.file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or_default()
}

/// Collect the built static libraries under OUT_DIR, renaming the odd
/// `foo.a` (no `lib` prefix) artifacts some generators produce.
fn extract_lib_names(out_dir: &Path) -> Vec<String> {
    let pattern = if cfg!(windows) { "*.lib" } else { "*.a" };
    let mut lib_names = Vec::new();
    for dir in ["lib", "lib64"] {
        let joined = out_dir.join(dir).join(pattern);
        for path in glob(joined.to_str().unwrap()).unwrap().flatten() {
            let stem = path.file_stem().unwrap().to_str().unwrap();
            let name = if let Some(stripped) = stem.strip_prefix("lib") {
                stripped.to_string()
            } else {
                if path.extension() == Some(std::ffi::OsStr::new("a")) {
                    let target = path.parent().unwrap().join(format!("lib{stem}.a"));
                    std::fs::rename(&path, &target).unwrap_or_else(|e| {
                        panic!("failed to rename {path:?} to {target:?}: {e:?}")
                    });
                }
                stem.to_string()
            };
            lib_names.push(name);
        }
    }
    lib_names
}

fn macos_link_search_path() -> Option<String> {
    let output = Command::new("clang")
        .arg("--print-search-dirs")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if line.contains("libraries: =") {
            let path = line.split('=').nth(1)?;
            return Some(format!("{path}/lib/darwin"));
        }
    }
    None
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=wrapper.h");

    let (target_os, target_triple) =
        parse_target_os().unwrap_or_else(|t| panic!("unsupported target {t}"));
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let llama_src = Path::new(&manifest_dir).join("llama.cpp");

    if !llama_src.join("include").join("llama.h").exists() {
        panic!(
            "llama.cpp sources not found at {}; run `git submodule update --init`",
            llama_src.display()
        );
    }

    // Rebuild when the vendored sources change.
    let rebuild_roots = [
        llama_src.join("src"),
        llama_src.join("ggml/src"),
        llama_src.join("common"),
    ];
    for entry in walkdir::WalkDir::new(&llama_src)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .flatten()
    {
        let watched = entry
            .file_name()
            .to_str()
            .map(|f| f.starts_with("CMake"))
            .unwrap_or_default()
            || rebuild_roots.iter().any(|r| entry.path().starts_with(r));
        if watched {
            println!("cargo:rerun-if-changed={}", entry.path().display());
        }
    }

    env::set_var(
        "CMAKE_BUILD_PARALLEL_LEVEL",
        std::thread::available_parallelism()
            .unwrap()
            .get()
            .to_string(),
    );

    // Bindings first; the headers are all we need for the types.
    let bindings = bindgen::Builder::default()
        .header("wrapper.h")
        .clang_arg(format!("-I{}", llama_src.join("include").display()))
        .clang_arg(format!("-I{}", llama_src.join("ggml/include").display()))
        .clang_arg(format!("--target={target_triple}"))
        .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
        .derive_partialeq(true)
        .allowlist_function("llama_.*")
        .allowlist_type("llama_.*")
        .allowlist_function("ggml_.*")
        .allowlist_type("ggml_.*")
        .prepend_enum_name(false)
        .generate()
        .expect("failed to generate llama.cpp bindings");
    bindings
        .write_to_file(out_dir.join("bindings.rs"))
        .expect("failed to write bindings");

    // Static CPU build, tools and tests off.
    let profile = env::var("LLAMA_LIB_PROFILE").unwrap_or("Release".to_string());
    println!("cargo:rerun-if-env-changed=LLAMA_LIB_PROFILE");

    let mut config = Config::new(&llama_src);
    config.define("LLAMA_BUILD_TESTS", "OFF");
    config.define("LLAMA_BUILD_EXAMPLES", "OFF");
    config.define("LLAMA_BUILD_SERVER", "OFF");
    config.define("LLAMA_BUILD_TOOLS", "OFF");
    config.define("LLAMA_CURL", "OFF");
    config.define("BUILD_SHARED_LIBS", "OFF");
    config.define("LLAMA_BUILD", "ON");
    config.define(
        "GGML_OPENMP",
        if cfg!(feature = "openmp") { "ON" } else { "OFF" },
    );

    if matches!(target_os, TargetOs::MacOs | TargetOs::AppleOther) {
        config.define("GGML_BLAS", "OFF");
    }
    // Portable kernels unless the `native` feature asks otherwise.
    if matches!(target_os, TargetOs::Linux)
        && target_triple.contains("aarch64")
        && env::var("CARGO_FEATURE_NATIVE").is_err()
    {
        config.define("GGML_NATIVE", "OFF");
        config.define("GGML_CPU_ARM_ARCH", "armv8-a");
    }

    let build_dir = config.profile(&profile).always_configure(false).build();

    println!("cargo:rustc-link-search={}", out_dir.join("lib").display());
    println!("cargo:rustc-link-search={}", out_dir.join("lib64").display());
    println!("cargo:rustc-link-search={}", build_dir.display());

    let libs = extract_lib_names(&out_dir);
    if libs.is_empty() {
        println!("cargo:rustc-link-lib=static=llama");
    } else {
        for lib in libs {
            println!("cargo:rustc-link-lib=static={lib}");
        }
    }

    match target_os {
        TargetOs::WindowsMsvc => {
            println!("cargo:rustc-link-lib=advapi32");
            if cfg!(debug_assertions) {
                println!("cargo:rustc-link-lib=dylib=msvcrtd");
            }
        }
        TargetOs::WindowsOther => {}
        TargetOs::Linux => {
            println!("cargo:rustc-link-lib=dylib=stdc++");
        }
        TargetOs::MacOs | TargetOs::AppleOther => {
            println!("cargo:rustc-link-lib=framework=Foundation");
            println!("cargo:rustc-link-lib=framework=Metal");
            println!("cargo:rustc-link-lib=framework=MetalKit");
            println!("cargo:rustc-link-lib=framework=Accelerate");
            println!("cargo:rustc-link-lib=c++");
            if matches!(target_os, TargetOs::MacOs) {
                if let Some(path) = macos_link_search_path() {
                    println!("cargo:rustc-link-lib=clang_rt.osx");
                    println!("cargo:rustc-link-search={path}");
                }
            }
        }
    }
}
