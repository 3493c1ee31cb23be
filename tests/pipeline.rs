mod common;

use std::fs;
use std::sync::Arc;

use assert_fs::TempDir;
use common::*;
use rstest::*;
use vitsearch::config::Acceleration;
use vitsearch::dispatch::QueryImage;
use vitsearch::{
    Embedder, Error, IndexArtifact, IndexBuilder, Metric, QueryDispatcher, Searcher,
};

struct Workspace {
    root: TempDir,
}

impl Workspace {
    fn data(&self) -> std::path::PathBuf {
        self.root.path().join("data")
    }

    fn index(&self) -> std::path::PathBuf {
        self.root.path().join("index").join("image_features.index")
    }

    fn mapping(&self) -> std::path::PathBuf {
        self.root.path().join("index").join("image_paths.bin")
    }

    fn build(&self, metric: Metric) -> vitsearch::Result<()> {
        let built = IndexBuilder::new(self.data())
            .dimension(PIXEL_DIMENSION)
            .metric(metric)
            .build(&PixelEmbedder)?;
        fs::create_dir_all(self.root.path().join("index"))?;
        built.artifact.save(&self.index(), &self.mapping())
    }

    fn load(&self) -> vitsearch::Result<Searcher> {
        Searcher::load(&self.index(), &self.mapping(), PIXEL_DIMENSION, Acceleration::Off)
    }
}

#[fixture]
fn workspace() -> Workspace {
    let root = TempDir::new().unwrap();
    fs::create_dir(root.path().join("data")).unwrap();
    Workspace { root }
}

#[rstest]
fn self_query_ranks_first(workspace: Workspace) {
    let images = write_images(&workspace.data(), 5);
    workspace.build(Metric::InnerProduct).unwrap();
    let searcher = workspace.load().unwrap();
    assert_eq!(searcher.index().ntotal(), 5);

    for image in &images {
        let query = PixelEmbedder.extract(image).unwrap();
        let hits = searcher.search(&query, 5).unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].path, image.to_string_lossy());
        assert!((hits[0].score - 1.0).abs() < 1e-4, "score = {}", hits[0].score);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }
}

#[rstest]
fn l2_ranks_self_with_zero_distance(workspace: Workspace) {
    let images = write_images(&workspace.data(), 4);
    workspace.build(Metric::SquaredL2).unwrap();
    let searcher = workspace.load().unwrap();

    let query = PixelEmbedder.extract(&images[2]).unwrap();
    let hits = searcher.search(&query, 4).unwrap();
    assert_eq!(hits[0].ordinal, 2);
    assert!(hits[0].score.abs() < 1e-4);
    assert!(hits.windows(2).all(|w| w[0].score <= w[1].score));
}

#[rstest]
fn mapping_follows_insertion_order(workspace: Workspace) {
    let images = write_images(&workspace.data(), 6);
    workspace.build(Metric::InnerProduct).unwrap();
    let searcher = workspace.load().unwrap();

    let expected = images.iter().map(|p| p.to_string_lossy().into_owned()).collect::<Vec<_>>();
    assert_eq!(searcher.paths(), expected.as_slice());
    for (i, image) in images.iter().enumerate() {
        let vector = PixelEmbedder.extract(image).unwrap();
        let stored = searcher.index().vector(i).unwrap();
        assert!(vector.iter().zip(stored).all(|(a, b)| (a - b).abs() < 1e-6));
    }
}

#[rstest]
fn loading_twice_gives_identical_results(workspace: Workspace) {
    let images = write_images(&workspace.data(), 5);
    workspace.build(Metric::InnerProduct).unwrap();
    let a = workspace.load().unwrap();
    let b = workspace.load().unwrap();

    let query = PixelEmbedder.extract(&images[1]).unwrap();
    assert_eq!(a.search(&query, 3).unwrap(), b.search(&query, 3).unwrap());
    assert_eq!(a.status(), b.status());
}

#[rstest]
fn k_larger_than_index_is_clamped(workspace: Workspace) {
    let images = write_images(&workspace.data(), 3);
    workspace.build(Metric::InnerProduct).unwrap();
    let searcher = workspace.load().unwrap();
    let query = PixelEmbedder.extract(&images[0]).unwrap();
    assert_eq!(searcher.search(&query, 1000).unwrap().len(), 3);
}

#[rstest]
fn empty_directory_writes_nothing(workspace: Workspace) {
    fs::write(workspace.data().join("notes.txt"), "not an image").unwrap();
    let err = workspace.build(Metric::InnerProduct).unwrap_err();
    assert!(matches!(err, Error::EmptySource(_)));
    assert!(!workspace.index().exists());
    assert!(!workspace.mapping().exists());
}

#[rstest]
fn truncated_mapping_fails_loudly(workspace: Workspace) {
    write_images(&workspace.data(), 5);
    workspace.build(Metric::InnerProduct).unwrap();

    let loaded = IndexArtifact::load(&workspace.index(), &workspace.mapping(), PIXEL_DIMENSION)
        .unwrap();
    let mut paths = loaded.artifact.paths;
    paths.pop();
    fs::write(workspace.mapping(), bincode::serialize(&paths).unwrap()).unwrap();

    let err = workspace.load().err().unwrap();
    assert!(matches!(err, Error::InconsistentArtifact(_)), "{err}");
}

#[rstest]
fn missing_artifacts_ask_for_build(workspace: Workspace) {
    let err = workspace.load().err().unwrap();
    assert!(matches!(err, Error::MissingArtifact { .. }));
    assert!(err.to_string().contains("vitsearch build"));
}

#[rstest]
fn configured_dimension_yields_to_file(workspace: Workspace) {
    write_images(&workspace.data(), 2);
    workspace.build(Metric::InnerProduct).unwrap();
    let searcher =
        Searcher::load(&workspace.index(), &workspace.mapping(), 768, Acceleration::Off).unwrap();
    assert_eq!(searcher.index().dimension(), PIXEL_DIMENSION);
    assert_eq!(searcher.status().adopted_dimension, Some(PIXEL_DIMENSION));
}

#[rstest]
fn failed_images_are_skipped(workspace: Workspace) {
    let images = write_images(&workspace.data(), 3);
    fs::copy(&images[0], workspace.data().join("bad.png")).unwrap();
    let built = IndexBuilder::new(workspace.data())
        .dimension(PIXEL_DIMENSION)
        .build(&PickyEmbedder)
        .unwrap();
    assert_eq!(built.report.scanned, 4);
    assert_eq!(built.report.embedded, 3);
    assert_eq!(built.report.skipped, 1);
    assert!(built.artifact.paths.iter().all(|p| !p.contains("bad")));
}

#[rstest]
fn undecodable_only_directory_has_no_embeddings(workspace: Workspace) {
    fs::write(workspace.data().join("broken.png"), b"not really a png").unwrap();
    let err = workspace.build(Metric::InnerProduct).unwrap_err();
    assert!(matches!(err, Error::NoEmbeddings));
    assert!(!workspace.index().exists());
}

#[rstest]
fn wrong_embedding_dimension_is_fatal(workspace: Workspace) {
    write_images(&workspace.data(), 2);
    let result = IndexBuilder::new(workspace.data())
        .dimension(PIXEL_DIMENSION)
        .build(&ShortEmbedder);
    assert!(matches!(result, Err(Error::DimensionMismatch { expected: PIXEL_DIMENSION, actual: 16 })));
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatcher_searches_uploaded_bytes(workspace: Workspace) {
    let images = write_images(&workspace.data(), 5);
    workspace.build(Metric::InnerProduct).unwrap();
    let searcher = Arc::new(workspace.load().unwrap());
    let (dispatcher, mut outcomes) = QueryDispatcher::new(Arc::new(PixelEmbedder), searcher);

    let bytes = fs::read(&images[3]).unwrap();
    let hits = dispatcher.query(QueryImage::Bytes(bytes), 2).await.unwrap();
    assert_eq!(hits[0].ordinal, 3);

    let ticket = dispatcher.submit(images[4].clone(), 1);
    let outcome = outcomes.recv().await.unwrap();
    assert_eq!(outcome.ticket, ticket);
    assert_eq!(outcome.result.unwrap()[0].ordinal, 4);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatcher_reports_bad_queries(workspace: Workspace) {
    write_images(&workspace.data(), 2);
    workspace.build(Metric::InnerProduct).unwrap();
    let searcher = Arc::new(workspace.load().unwrap());
    let (dispatcher, _outcomes) = QueryDispatcher::new(Arc::new(PixelEmbedder), searcher);

    let err = dispatcher.query(QueryImage::Bytes(b"garbage".to_vec()), 1).await.unwrap_err();
    assert!(matches!(err, Error::Extract { .. }));
}
