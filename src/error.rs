use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Couldn't open the build queue database.\n{0}")]
    Open(#[source] rusqlite::Error),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
#[error(transparent)]
pub struct CacheError(#[from] std::io::Error);

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Couldn't create the scratch directory.\n{0}")]
    CreateDir(#[source] std::io::Error),

    #[error("Couldn't write the snippet source file.\n{0}")]
    WriteSource(#[source] std::io::Error),

    #[error("Couldn't remove the scratch directory.\n{0}")]
    RemoveDir(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Couldn't parse the tool output.\n{0}")]
    Xml(#[from] roxmltree::Error),

    #[error("No program listing found in the tool output")]
    MissingListing,
}
