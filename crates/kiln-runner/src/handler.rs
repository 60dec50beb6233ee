//! Uniform handler type behind every hook registration
//!
//! Plugins can hand the runner an async closure, a plain synchronous closure,
//! a callback-style closure that reports completion through a [`Done`] token,
//! or a struct implementing [`FileHook`] / [`BuildHook`]. Each style is
//! adapted once, at registration, into the same boxed-future shape so the
//! registry only ever awaits one kind of thing.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use kiln_core::FileId;
use tokio::sync::oneshot;

use crate::build::Build;
use crate::error::RunnerError;

pub type HookFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Signature of a handler bound to a single file.
pub type FileFn = dyn Fn(FileId, Arc<Build>) -> HookFuture + Send + Sync;

/// Signature of a handler that runs once per build.
pub type BuildFn = dyn Fn(Arc<Build>) -> HookFuture + Send + Sync;

/// A named, awaitable hook handler.
pub struct Handler<F: ?Sized> {
    name: Arc<str>,
    call: Arc<F>,
}

pub type FileHandler = Handler<FileFn>;
pub type BuildHandler = Handler<BuildFn>;

impl<F: ?Sized> Handler<F> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<F: ?Sized> Clone for Handler<F> {
    fn clone(&self) -> Self {
        Handler {
            name: Arc::clone(&self.name),
            call: Arc::clone(&self.call),
        }
    }
}

impl<F: ?Sized> fmt::Debug for Handler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("name", &self.name).finish()
    }
}

/// Completion token handed to callback-style handlers.
///
/// Dropping it without calling [`Done::finish`] fails the hook.
pub struct Done {
    tx: oneshot::Sender<anyhow::Result<()>>,
}

impl Done {
    pub fn finish(self, result: anyhow::Result<()>) {
        // the receiver only disappears if the build was abandoned
        let _ = self.tx.send(result);
    }

    pub fn ok(self) {
        self.finish(Ok(()));
    }
}

fn completion(name: &Arc<str>) -> (Done, HookFuture) {
    let (tx, rx) = oneshot::channel();
    let handler = name.to_string();
    let wait = async move {
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RunnerError::CallbackDropped { handler }.into()),
        }
    };
    (Done { tx }, wait.boxed())
}

/// A struct-style handler for file phases.
#[async_trait]
pub trait FileHook: Send + Sync + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, file: FileId, build: Arc<Build>) -> anyhow::Result<()>;
}

/// A struct-style handler for build-wide phases.
#[async_trait]
pub trait BuildHook: Send + Sync + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, build: Arc<Build>) -> anyhow::Result<()>;
}

impl Handler<FileFn> {
    /// Wrap an async closure.
    pub fn new<H, Fut>(name: impl Into<Arc<str>>, handler: H) -> Self
    where
        H: Fn(FileId, Arc<Build>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let call: Arc<FileFn> =
            Arc::new(move |file: FileId, build: Arc<Build>| handler(file, build).boxed());
        Handler {
            name: name.into(),
            call,
        }
    }

    /// Wrap a synchronous closure. It runs to completion when invoked.
    pub fn sync<H>(name: impl Into<Arc<str>>, handler: H) -> Self
    where
        H: Fn(FileId, &Build) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let call: Arc<FileFn> = Arc::new(move |file: FileId, build: Arc<Build>| {
            future::ready(handler(file, &build)).boxed()
        });
        Handler {
            name: name.into(),
            call,
        }
    }

    /// Wrap a callback-style closure that signals completion through [`Done`].
    pub fn callback<H>(name: impl Into<Arc<str>>, handler: H) -> Self
    where
        H: Fn(FileId, Arc<Build>, Done) + Send + Sync + 'static,
    {
        let name: Arc<str> = name.into();
        let label = Arc::clone(&name);
        let call: Arc<FileFn> = Arc::new(move |file: FileId, build: Arc<Build>| {
            let (done, wait) = completion(&label);
            handler(file, build, done);
            wait
        });
        Handler { name, call }
    }

    pub fn from_hook(hook: impl FileHook) -> Self {
        let hook = Arc::new(hook);
        let name: Arc<str> = hook.name().into();
        let call: Arc<FileFn> = Arc::new(move |file: FileId, build: Arc<Build>| {
            let hook = Arc::clone(&hook);
            async move { hook.run(file, build).await }.boxed()
        });
        Handler { name, call }
    }

    pub(crate) fn invoke(&self, file: FileId, build: Arc<Build>) -> HookFuture {
        (self.call)(file, build)
    }
}

impl Handler<BuildFn> {
    /// Wrap an async closure.
    pub fn new<H, Fut>(name: impl Into<Arc<str>>, handler: H) -> Self
    where
        H: Fn(Arc<Build>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let call: Arc<BuildFn> = Arc::new(move |build: Arc<Build>| handler(build).boxed());
        Handler {
            name: name.into(),
            call,
        }
    }

    /// Wrap a synchronous closure. It runs to completion when invoked.
    pub fn sync<H>(name: impl Into<Arc<str>>, handler: H) -> Self
    where
        H: Fn(&Build) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let call: Arc<BuildFn> =
            Arc::new(move |build: Arc<Build>| future::ready(handler(&build)).boxed());
        Handler {
            name: name.into(),
            call,
        }
    }

    /// Wrap a callback-style closure that signals completion through [`Done`].
    pub fn callback<H>(name: impl Into<Arc<str>>, handler: H) -> Self
    where
        H: Fn(Arc<Build>, Done) + Send + Sync + 'static,
    {
        let name: Arc<str> = name.into();
        let label = Arc::clone(&name);
        let call: Arc<BuildFn> = Arc::new(move |build: Arc<Build>| {
            let (done, wait) = completion(&label);
            handler(build, done);
            wait
        });
        Handler { name, call }
    }

    pub fn from_hook(hook: impl BuildHook) -> Self {
        let hook = Arc::new(hook);
        let name: Arc<str> = hook.name().into();
        let call: Arc<BuildFn> = Arc::new(move |build: Arc<Build>| {
            let hook = Arc::clone(&hook);
            async move { hook.run(build).await }.boxed()
        });
        Handler { name, call }
    }

    pub(crate) fn invoke(&self, build: Arc<Build>) -> HookFuture {
        (self.call)(build)
    }
}
