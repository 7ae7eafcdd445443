pub mod engine;

pub use engine::{
    export_filename, header, render_csv, ExportArtifact, ExportEngine, DEFAULT_EXPORT_CHUNK_SIZE,
};
