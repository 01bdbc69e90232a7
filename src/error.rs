use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open the catalog")]
    Catalog,
    #[display("could not prepare the thumbnail store")]
    Thumbnails,
    #[display("indexing failed")]
    Indexing,
    #[display("could not write output")]
    Output,
}
