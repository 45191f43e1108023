// 构建脚本: 链接FFmpeg依赖库
fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // 仅在启用 ffmpeg 特性且为 Windows MSVC 环境时添加FFmpeg相关库
    #[cfg(all(target_os = "windows", target_env = "msvc"))]
    {
        if std::env::var_os("CARGO_FEATURE_FFMPEG").is_some() {
            // Intel QSV (Quick Sync Video) 硬件加速
            println!("cargo:rustc-link-lib=dylib=libmfx");

            // x264 编码器
            println!("cargo:rustc-link-lib=dylib=libx264");

            // OLE 自动化和VFW
            println!("cargo:rustc-link-lib=dylib=oleaut32");
            println!("cargo:rustc-link-lib=dylib=vfw32");

            // Secure Channel (TLS/SSL)
            println!("cargo:rustc-link-lib=dylib=secur32");
        }
    }
}
