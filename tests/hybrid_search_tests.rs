//! End-to-end ingestion and retrieval against a live Postgres.
//!
//! These tests need `DATABASE_URL` pointing at a database with the
//! pgvector and unaccent extensions available; they skip silently
//! otherwise.

mod test_helpers;

use hierarag::config::{ProcessingConfig, SplitterConfig};
use hierarag::ingest::{CancelFlag, ProcessingService};
use hierarag::{
    ChunkKind, Document, DocumentStatus, GenFlag, HybridSearch, Library, RagError, TextSplitter,
};
use test_helpers::{connect_test_store, test_counter, test_dispatcher, test_library};
use uuid::Uuid;

fn service(store: hierarag::Store) -> ProcessingService {
    ProcessingService::new(
        store,
        test_dispatcher(),
        TextSplitter::new(SplitterConfig::default(), test_counter()),
        test_counter(),
        ProcessingConfig::default(),
    )
}

fn search(store: hierarag::Store) -> HybridSearch {
    HybridSearch::new(store, test_dispatcher(), test_counter(), 2048)
}

/// Insert a tiny pre-chunked corpus without running the pipeline
async fn seed_chunks(
    store: &hierarag::Store,
    library: &Library,
    texts: &[&str],
) -> (i64, Vec<i64>) {
    let document = store
        .documents()
        .insert(&Document::new(
            library.id,
            format!("seed-{}", Uuid::new_v4()),
            "seed",
        ))
        .await
        .unwrap();

    let chapters = store
        .documents()
        .insert_chapters(&[hierarag::Chapter {
            id: 0,
            document_id: document.id,
            title: "seed chapter".to_string(),
            text: "seed".to_string(),
            order_in_document: 0,
            token_start: 0,
            token_end: 1,
            token_count: 1,
            metadata: Default::default(),
        }])
        .await
        .unwrap();

    let chunks: Vec<hierarag::Chunk> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            hierarag::Chunk::new(library.id, document.id, ChunkKind::Excerpt, *text)
                .with_chapter(chapters[0].id, Some(i as i32 + 1))
        })
        .collect();
    let ids = store.chunks().insert_batch(&chunks).await.unwrap();
    (document.id, ids)
}

#[tokio::test]
async fn ingest_then_hybrid_search_ranks_matching_chapter_first() {
    let Some(store) = connect_test_store().await else {
        return;
    };
    let library = test_library(&store, 0.6, 0.4).await;
    let service = service(store.clone());

    let text = "# alfa\n\nalfa alfa alfa alfa\n\n# bravo\n\nbravo bravo bravo bravo";
    let document = Document::new(library.id, format!("doc-{}", Uuid::new_v4()), text);
    let stats = service
        .process(
            document.clone(),
            &library,
            GenFlag::OnlyText,
            None,
            &CancelFlag::new(),
        )
        .await;

    assert!(stats.success, "{:?}", stats.error_message);
    assert_eq!(stats.chapters, 2);
    assert_eq!(stats.chunks, 2);
    assert_eq!(stats.failed, 0);

    let persisted = store
        .documents()
        .find_by_uuid(document.uuid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted.status, DocumentStatus::Ready);

    // All vectors L2-normalized at the library dimension
    for chunk in store.chunks().find_by_document(persisted.id).await.unwrap() {
        let vector = chunk.embedding.expect("vector filled");
        assert_eq!(vector.len(), test_helpers::TEST_DIMENSION);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    let results = search(store.clone())
        .search_hybrid("alfa", &[library.clone()], 5, None)
        .await
        .unwrap();

    assert!(!results.is_empty());
    let top = &results[0];
    assert!(top.chunk.text.contains("alfa"));
    assert!(top.semantic_score > 0.0, "semantic side must contribute");
    assert!(top.lexical_score > 0.0, "lexical side must contribute");
}

#[tokio::test]
async fn accent_insensitive_matching() {
    let Some(store) = connect_test_store().await else {
        return;
    };
    let library = test_library(&store, 0.5, 0.5).await;
    seed_chunks(&store, &library, &["um café bem quente", "chá gelado"]).await;

    let search = search(store.clone());
    let libraries = [library];

    let accented = search
        .search_textual("café", &libraries, 10)
        .await
        .unwrap();
    let plain = search.search_textual("cafe", &libraries, 10).await.unwrap();

    assert_eq!(accented.len(), 1);
    assert_eq!(plain.len(), 1);
    assert_eq!(accented[0].chunk.id, plain[0].chunk.id);
}

#[tokio::test]
async fn phrase_query_requires_adjacency() {
    let Some(store) = connect_test_store().await else {
        return;
    };
    let library = test_library(&store, 0.5, 0.5).await;
    seed_chunks(
        &store,
        &library,
        &[
            "o pão quente saiu do forno",
            "o pão saiu do forno ainda quente",
        ],
    )
    .await;

    let results = search(store.clone())
        .search_textual("\"pão quente\"", &[library], 10)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].chunk.text.contains("pão quente"));
}

#[tokio::test]
async fn free_form_metadata_is_lexically_reachable() {
    let Some(store) = connect_test_store().await else {
        return;
    };
    let library = test_library(&store, 0.5, 0.5).await;
    let (document_id, _) = seed_chunks(&store, &library, &["texto sem relação"]).await;

    let chapters = store.documents().find_chapters(document_id).await.unwrap();
    let chunk = hierarag::Chunk::new(
        library.id,
        document_id,
        ChunkKind::Excerpt,
        "conteúdo genérico",
    )
    .with_chapter(chapters[0].id, Some(10))
    .with_metadata("jurisdiction", "São Paulo");
    let ids = store.chunks().insert_batch(&[chunk]).await.unwrap();

    // An ad-hoc metadata key outside the six named ones still matches at
    // weight D
    let results = search(store.clone())
        .search_textual("paulo", &[library], 10)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.id, ids[0]);
}

#[tokio::test]
async fn exclusion_query_filters_chunks() {
    let Some(store) = connect_test_store().await else {
        return;
    };
    let library = test_library(&store, 0.5, 0.5).await;
    seed_chunks(
        &store,
        &library,
        &["café com açúcar", "café puro sem nada"],
    )
    .await;

    let results = search(store.clone())
        .search_textual("café -açúcar", &[library], 10)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].chunk.text.contains("puro"));
}

#[tokio::test]
async fn partial_documents_still_serve_lexically() {
    let Some(store) = connect_test_store().await else {
        return;
    };
    let library = test_library(&store, 0.5, 0.5).await;
    let (_, ids) = seed_chunks(
        &store,
        &library,
        &["vetor preenchido aqui", "vetor pendente aqui"],
    )
    .await;

    // Backfill only the first chunk; the second stays vectorless
    let vector: Vec<f32> = (0..test_helpers::TEST_DIMENSION).map(|i| i as f32).collect();
    store.chunks().update_vector(ids[0], &vector).await.unwrap();

    let search = search(store.clone());
    let libraries = [library];

    // Semantic pass sees only the embedded chunk
    let semantic = search
        .search_semantic("vetor", &libraries, 10)
        .await
        .unwrap();
    assert_eq!(semantic.len(), 1);
    assert_eq!(semantic[0].chunk.id, ids[0]);

    // Lexical pass reaches both
    let textual = search.search_textual("vetor", &libraries, 10).await.unwrap();
    assert_eq!(textual.len(), 2);
}

#[tokio::test]
async fn search_validation_errors() {
    let Some(store) = connect_test_store().await else {
        return;
    };
    let library = test_library(&store, 0.5, 0.5).await;
    let search = search(store.clone());
    let libraries = [library];

    assert!(matches!(
        search.search_hybrid("", &libraries, 5, None).await,
        Err(RagError::InvalidInput(_))
    ));
    assert!(matches!(
        search.search_hybrid("ok", &libraries, 0, None).await,
        Err(RagError::InvalidInput(_))
    ));
    assert!(matches!(
        search.search_hybrid("ok", &libraries, 101, None).await,
        Err(RagError::InvalidInput(_))
    ));
    assert!(matches!(
        search.search_hybrid("a AND b", &libraries, 5, None).await,
        Err(RagError::InvalidInput(_))
    ));
    // Weight override must stay convex
    assert!(matches!(
        search
            .search_hybrid("ok", &libraries, 5, Some((0.9, 0.4)))
            .await,
        Err(RagError::InvalidConfiguration(_))
    ));
}
