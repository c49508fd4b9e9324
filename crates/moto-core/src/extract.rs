use crate::error::AppError;
use crate::models::RawExtraction;
use crate::traits::{AttributeExtractor, Fetcher, PageParser};

/// Fetches a vendor page and hands it to a [`PageParser`].
///
/// A page that yields nothing recognisable is still a successful
/// extraction; only transport, status and parse failures are errors.
#[derive(Clone)]
pub struct ListingExtractor<F, P>
where
    F: Fetcher,
    P: PageParser,
{
    fetcher: F,
    parser: P,
}

impl<F, P> ListingExtractor<F, P>
where
    F: Fetcher,
    P: PageParser,
{
    pub fn new(fetcher: F, parser: P) -> Self {
        Self { fetcher, parser }
    }
}

impl<F, P> AttributeExtractor for ListingExtractor<F, P>
where
    F: Fetcher,
    P: PageParser,
{
    async fn extract(&self, url: &str) -> Result<RawExtraction, AppError> {
        tracing::info!(%url, "Fetching listing page");
        let html = self.fetcher.fetch(url).await?;
        tracing::debug!(bytes = html.len(), "Fetched listing page");

        let raw = self.parser.parse(&html)?;
        if raw.is_empty() {
            tracing::warn!(%url, "No attributes recognised on listing page");
        } else {
            tracing::info!(
                name = %raw.name,
                year = ?raw.year,
                images = raw.images.len(),
                "Listing page parsed"
            );
        }
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    #[tokio::test]
    async fn parses_fetched_page() {
        let raw = RawExtraction {
            name: "Honda CB500X".into(),
            year: Some(2021),
            ..Default::default()
        };
        let fetcher = MockFetcher::new("<html><h1>Honda CB500X</h1></html>");
        let parser = MockParser::new(raw.clone());
        let extractor = ListingExtractor::new(fetcher, parser.clone());

        let result = extractor.extract("https://jmmoto.ru/moto/1").await.unwrap();

        assert_eq!(result, raw);
        assert_eq!(
            parser.seen.lock().unwrap().as_slice(),
            ["<html><h1>Honda CB500X</h1></html>"]
        );
    }

    #[tokio::test]
    async fn empty_extraction_is_not_an_error() {
        let extractor = ListingExtractor::new(
            MockFetcher::new("<html><body>nothing here</body></html>"),
            MockParser::new(RawExtraction::default()),
        );

        let result = extractor.extract("https://jmmoto.ru/moto/1").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn fetch_error_propagates() {
        let extractor = ListingExtractor::new(
            MockFetcher::with_error(AppError::HttpStatus {
                status: 404,
                url: "https://jmmoto.ru/moto/1".into(),
            }),
            MockParser::new(RawExtraction::default()),
        );

        let err = extractor.extract("https://jmmoto.ru/moto/1").await.unwrap_err();
        assert!(matches!(err, AppError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn parse_error_propagates() {
        let extractor = ListingExtractor::new(
            MockFetcher::new("garbage"),
            MockParser::with_error(AppError::ParseError("no <body>".into())),
        );

        let err = extractor.extract("https://jmmoto.ru/moto/1").await.unwrap_err();
        assert!(matches!(err, AppError::ParseError(_)));
    }
}
