pub mod allanime;
pub mod cache;
pub mod clock;
pub mod deobfuscate;
pub mod hls;
pub mod resolver;
pub mod wixmp;
