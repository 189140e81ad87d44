use std::collections::HashMap;

use async_trait::async_trait;
use batchload::{BatchFunction, BatchResult, Loader, LoaderConfig};

#[derive(Debug, PartialEq, thiserror::Error)]
#[error("no film numbered {0}")]
struct UnknownFilm(i64);

// Empty functor that implements the BatchFunction trait. For this example, it
// trivially loads values from some HashMap.
struct FilmBatch;

#[async_trait]
impl BatchFunction<i64, String> for FilmBatch {
    type Context = HashMap<i64, String>;
    type Error = UnknownFilm;

    async fn load(keys: &[i64], context: &Self::Context) -> BatchResult<String, UnknownFilm> {
        println!("fetching {keys:?}");
        Ok(keys.iter().map(|k| context.get(k).cloned().ok_or(UnknownFilm(*k))).collect())
    }
}

#[tokio::main]
async fn main() {
    let mut context = HashMap::new();
    context.insert(2001, "a space odyssey".to_owned());
    context.insert(7, "samurai".to_owned());
    context.insert(12, "angry men".to_owned());

    let config = LoaderConfig::default().with_batch_capacity(2);
    let loader: Loader<i64, String, UnknownFilm> = Loader::with_config(FilmBatch, context, config);

    assert_eq!(loader.load(7).await.as_deref(), Ok("samurai"));
    assert_eq!(loader.load(15).await.unwrap_err().to_string(), "no film numbered 15");

    // Two batches: [12, 2010] on capacity, then [2001] once the wait window closes. 7 is cached.
    let films = loader.load_all(vec![12, 2010, 2001, 7]).await;
    for film in films {
        match film {
            Ok(title) => println!("found {title}"),
            Err(e) => println!("{e}"),
        }
    }
}
