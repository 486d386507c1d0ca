// build.rs
// Compiles the presenter's GLSL shaders to SPIR-V in OUT_DIR; the library embeds them

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

// (source, output) pairs; output names are what src/.../rendering/shader.rs includes
const SHADERS: [(&str, &str); 2] = [("quad.vert", "quad.spv"), ("image.frag", "image.spv")];

fn locate_glslc() -> Option<PathBuf> {
    if let Ok(sdk) = env::var("VULKAN_SDK") {
        let glslc = if cfg!(target_os = "windows") {
            Path::new(&sdk).join("Bin").join("glslc.exe")
        } else {
            Path::new(&sdk).join("bin").join("glslc")
        };
        if glslc.exists() {
            return Some(glslc);
        }
        println!("cargo:warning=glslc not found at {}, trying PATH", glslc.display());
    }

    match Command::new("glslc").arg("--version").output() {
        Ok(out) if out.status.success() => Some(PathBuf::from("glslc")),
        _ => None,
    }
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let shader_dir = manifest_dir.join("../../resources/shaders");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    for (source, _) in SHADERS {
        println!("cargo:rerun-if-changed={}", shader_dir.join(source).display());
    }

    let glslc = locate_glslc().unwrap_or_else(|| {
        panic!("glslc not found: install the Vulkan SDK and set VULKAN_SDK, or put glslc on PATH")
    });

    for (source, output) in SHADERS {
        let source_path = shader_dir.join(source);
        let output_path = out_dir.join(output);

        let status = Command::new(&glslc)
            .arg(&source_path)
            .arg("-o")
            .arg(&output_path)
            .status()
            .unwrap_or_else(|e| panic!("Failed to run {} for {}: {}", glslc.display(), source, e));

        if !status.success() {
            panic!(
                "glslc failed for {} with exit code {}",
                source_path.display(),
                status.code().unwrap_or(-1)
            );
        }
    }
}
