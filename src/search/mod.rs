//! Tantivy-based product search index.
//!
//! One index holds every tenant's catalog; each query is pinned to a single
//! company through a mandatory term on the stored `company_id` field.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::Product;

const BOOST_SKU: f32 = 10.0;
const BOOST_NAME: f32 = 8.0;
const BOOST_CATEGORY: f32 = 4.0;
const BOOST_DESCRIPTION: f32 = 2.5;

/// Search hit with product id and relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub product_id: String,
    pub score: f32,
}

struct SearchFields {
    product_id: Field,
    company_id: Field,
    sku: Field,
    name: Field,
    category: Field,
    description: Field,
}

/// Tantivy search index for catalog products.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        let product_id = schema_builder.add_text_field("product_id", STRING | STORED);
        let company_id = schema_builder.add_text_field("company_id", STRING | STORED);
        let sku = schema_builder.add_text_field("sku", TEXT);
        let name = schema_builder.add_text_field("name", TEXT);
        let category = schema_builder.add_text_field("category", TEXT);
        let description = schema_builder.add_text_field("description", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            product_id,
            company_id,
            sku,
            name,
            category,
            description,
        };

        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Replace the whole index with `products`.
    pub async fn rebuild(&self, products: &[Product]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for product in products {
            writer.add_document(self.create_document(product))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} products", products.len());
        Ok(())
    }

    /// Index (or re-index) a batch of products with one commit.
    pub async fn index_products(&self, products: &[Product]) -> Result<(), AppError> {
        if products.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.write().await;

        for product in products {
            writer.delete_term(Term::from_field_text(self.fields.product_id, &product.id));
            writer.add_document(self.create_document(product))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Search one company's catalog.
    pub fn search(
        &self,
        company_id: &str,
        query_str: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchResult>, AppError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let text_fields = [
            (self.fields.sku, BOOST_SKU),
            (self.fields.name, BOOST_NAME),
            (self.fields.category, BOOST_CATEGORY),
            (self.fields.description, BOOST_DESCRIPTION),
        ];

        // Validate the whole query once so syntax errors reach the caller.
        QueryParser::for_index(&self.index, text_fields.iter().map(|(f, _)| *f).collect())
            .parse_query(query_str)
            .map_err(|e| AppError::Search(format!("Invalid search query: {}", e)))?;

        let mut text_queries: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for (field, boost) in text_fields {
            let field_parser = QueryParser::for_index(&self.index, vec![field]);
            if let Ok(field_query) = field_parser.parse_query(query_str) {
                let boosted: Box<dyn Query> = Box::new(BoostQuery::new(field_query, boost));
                text_queries.push((Occur::Should, boosted));
            }
        }

        let tenant = TermQuery::new(
            Term::from_field_text(self.fields.company_id, company_id),
            IndexRecordOption::Basic,
        );
        let text: Box<dyn Query> = Box::new(BooleanQuery::new(text_queries));
        let tenant: Box<dyn Query> = Box::new(tenant);
        let combined = BooleanQuery::new(vec![(Occur::Must, tenant), (Occur::Must, text)]);

        let top_docs = searcher
            .search(&combined, &TopDocs::with_limit(limit + offset))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let results = top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                let product_id = doc.get_first(self.fields.product_id)?.as_str()?.to_string();
                Some(SearchResult { product_id, score })
            })
            .collect();

        Ok(results)
    }

    fn create_document(&self, product: &Product) -> TantivyDocument {
        doc!(
            self.fields.product_id => product.id.clone(),
            self.fields.company_id => product.company_id.clone(),
            self.fields.sku => product.sku.clone(),
            self.fields.name => product.name.clone(),
            self.fields.category => product.category.clone().unwrap_or_default(),
            self.fields.description => product.description.clone().unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn product(id: &str, company_id: &str, sku: &str, name: &str, category: &str) -> Product {
        Product {
            id: id.to_string(),
            company_id: company_id.to_string(),
            sku: sku.to_string(),
            name: name.to_string(),
            description: None,
            category: Some(category.to_string()),
            price_cents: 100,
            stock: 10,
            image_urls: Vec::new(),
            active: true,
            updated_at: "2024-01-01T00:00:00Z".to_string(),
            version: 1,
        }
    }

    #[tokio::test]
    async fn test_search_finds_by_name() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();

        index
            .rebuild(&[
                product("1", "c1", "TWL-01", "Paper towels", "cleaning"),
                product("2", "c1", "GLV-02", "Nitrile gloves", "safety"),
            ])
            .await
            .unwrap();

        let results = index.search("c1", "gloves", 10, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].product_id, "2");
    }

    #[tokio::test]
    async fn test_search_is_scoped_to_company() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();

        index
            .rebuild(&[
                product("1", "c1", "TWL-01", "Paper towels", "cleaning"),
                product("2", "c2", "TWL-01", "Paper towels", "cleaning"),
            ])
            .await
            .unwrap();

        let results = index.search("c2", "towels", 10, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].product_id, "2");
    }

    #[tokio::test]
    async fn test_reindex_replaces_document() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();

        index
            .index_products(&[product("1", "c1", "A-1", "Stapler", "office")])
            .await
            .unwrap();
        index
            .index_products(&[product("1", "c1", "A-1", "Hole punch", "office")])
            .await
            .unwrap();

        assert!(index.search("c1", "stapler", 10, 0).unwrap().is_empty());
        assert_eq!(index.search("c1", "punch", 10, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_empty_query() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();

        assert!(index.search("c1", "  ", 10, 0).unwrap().is_empty());
    }
}
