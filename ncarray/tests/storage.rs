#![allow(missing_docs)]

use std::{error::Error, sync::Arc};

use ncarray::{
    metadata::{DataType, FileFormat},
    storage::{
        storage_adapter::performance_metrics::PerformanceMetricsBackend, store::MemoryBackend,
        Config, OpenMode,
    },
    Dataset, StorageContext, VariableOptions,
};

fn create_field(context: &Arc<StorageContext>, uri: &str) -> Result<(), Box<dyn Error>> {
    let mut dataset = Dataset::create(context, uri, FileFormat::Cfa4)?;
    dataset.create_dimension("", "time", Some(4))?;
    dataset.create_dimension("", "lat", Some(4))?;
    dataset.create_variable(
        "",
        "psl",
        DataType::Float32,
        &["time", "lat"],
        VariableOptions::new().with_subarray_shape(vec![2, 2]),
    )?;
    let values: Vec<f32> = (0..16u8).map(f32::from).collect();
    dataset.write("psl", &[(0..4).into(), (0..4).into()], &values)?;
    dataset.close()?;
    Ok(())
}

#[test]
fn storage_read_touches_overlapping_partitions() -> Result<(), Box<dyn Error>> {
    let context = Arc::new(StorageContext::new(Config::default())?);
    let backend = Arc::new(PerformanceMetricsBackend::new(Arc::new(MemoryBackend::new())));
    context.insert_backend("memory://metrics", backend.clone());

    create_field(&context, "memory://metrics/psl.nca")?;
    assert_eq!(backend.objects_removed(), 0);
    assert!(backend.writes() > 0);

    let dataset = Dataset::open(&context, "memory://metrics/psl.nca", OpenMode::Read)?;
    backend.reset();
    assert_eq!(dataset.read::<f32>("psl", &[(0..2).into(), (2..4).into()])?, vec![2.0, 3.0, 6.0, 7.0]);
    assert_eq!(backend.opens(), 1);

    backend.reset();
    assert_eq!(dataset.read::<f32>("psl", &[(1..3).into(), (1..2).into()])?, vec![5.0, 9.0]);
    assert_eq!(backend.opens(), 2);
    assert_eq!(backend.bytes_written(), 0);
    Ok(())
}

#[cfg(feature = "object_store")]
#[test]
fn storage_object_store_dataset() -> Result<(), Box<dyn Error>> {
    use ncarray::{
        cache::CachePolicy,
        object_store::ObjectStoreBackend,
        storage::{
            config::{BackendOptions, ByteSize},
            StorageBackendTraits,
        },
    };

    let options = BackendOptions {
        part_size: ByteSize(64),
        max_parts: 2,
        ..BackendOptions::default()
    };
    let backend = ObjectStoreBackend::new_with_store(
        "s3",
        options,
        Arc::new(object_store::memory::InMemory::new()),
    )?;

    for policy in [CachePolicy::Memory, CachePolicy::Disk] {
        let cache = tempfile::tempdir()?;
        let config = Config::default().with_cache_location(cache.path());
        let context = Arc::new(StorageContext::new(config)?.with_cache_policy(policy));
        context.insert_backend("s3://bucket", Arc::new(backend.clone()));

        let uri = format!("s3://bucket/{policy}/psl.nca");
        create_field(&context, &uri)?;
        assert!(backend.exists(&uri)?);
        assert!(backend.exists(&format!("s3://bucket/{policy}/psl/psl_psl_[3].nc"))?);

        let dataset = Dataset::open(&context, &uri, OpenMode::Read)?;
        assert_eq!(
            dataset.read::<f32>("psl", &[(2..4).into(), (0..4).into()])?,
            (8..16u8).map(f32::from).collect::<Vec<_>>()
        );
        dataset.close()?;
    }
    Ok(())
}

#[cfg(feature = "object_store")]
#[test]
fn storage_disk_cache_follows_rewrites() -> Result<(), Box<dyn Error>> {
    use ncarray::{
        cache::CachePolicy, object_store::ObjectStoreBackend, storage::config::BackendOptions,
        DimSlice,
    };

    let backend = Arc::new(ObjectStoreBackend::new_with_store(
        "s3",
        BackendOptions::default(),
        Arc::new(object_store::memory::InMemory::new()),
    )?);
    let shared_cache = tempfile::tempdir()?;
    let other_cache = tempfile::tempdir()?;
    let disk_context = |cache: &std::path::Path| -> Result<Arc<StorageContext>, Box<dyn Error>> {
        let config = Config::default().with_cache_location(cache);
        let context = Arc::new(StorageContext::new(config)?.with_cache_policy(CachePolicy::Disk));
        context.insert_backend("s3://bucket", backend.clone());
        Ok(context)
    };
    let uri = "s3://bucket/rewrite/psl.nca";
    let region: [DimSlice; 2] = [(0..2).into(), (0..2).into()];

    let first = disk_context(shared_cache.path())?;
    create_field(&first, uri)?;
    let dataset = Dataset::open(&first, uri, OpenMode::Read)?;
    assert_eq!(dataset.read::<f32>("psl", &region)?, vec![0.0, 1.0, 4.0, 5.0]);
    dataset.close()?;

    // same shape and data type, so the rewritten sub-array has the same size
    let second = disk_context(other_cache.path())?;
    let mut dataset = Dataset::open(&second, uri, OpenMode::Update)?;
    dataset.write::<f32>("psl", &region, &[10.0, 20.0, 30.0, 40.0])?;
    dataset.close()?;

    let third = disk_context(shared_cache.path())?;
    let dataset = Dataset::open(&third, uri, OpenMode::Read)?;
    assert_eq!(dataset.read::<f32>("psl", &region)?, vec![10.0, 20.0, 30.0, 40.0]);
    assert_eq!(
        dataset.read::<f32>("psl", &[(2..4).into(), (2..4).into()])?,
        vec![10.0, 11.0, 14.0, 15.0]
    );
    Ok(())
}
