pub mod extract;
pub mod sitemap;

pub use extract::{list_documents, DocumentExtractor, ExtractedDocument, SourceExtractor};
pub use sitemap::SitemapClient;
