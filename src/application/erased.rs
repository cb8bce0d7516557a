//! Type-erased adapter over the controller.
//!
//! For callers that only want a bare decoded image: every method boxes its
//! future and collapses [`ImageDownload`](crate::domain::ImageDownload) to
//! the image, discarding the origin tier. No logic lives here beyond the
//! erasure.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::domain::errors::FetchResult;
use crate::domain::ports::ImageFetcherPort;

use super::image_controller::ImageController;

/// Boxed-future view of an [`ImageController`].
#[derive(Clone)]
pub struct ErasedImageFetcher {
    controller: ImageController,
}

impl ErasedImageFetcher {
    /// Wraps a controller.
    #[must_use]
    pub fn new(controller: ImageController) -> Self {
        Self { controller }
    }

    /// Fetches the image for `url` through all tiers.
    pub fn fetch_image(
        &self,
        url: Option<&str>,
    ) -> BoxFuture<'static, FetchResult<Arc<image::DynamicImage>>> {
        let controller = self.controller.clone();
        let url = url.map(str::to_string);
        async move {
            controller
                .fetch_image(url.as_deref())
                .await
                .map(crate::domain::ImageDownload::into_image)
        }
        .boxed()
    }

    /// Looks the image up in cache only.
    pub fn cached_image(
        &self,
        url: Option<&str>,
    ) -> BoxFuture<'static, FetchResult<Arc<image::DynamicImage>>> {
        let controller = self.controller.clone();
        let url = url.map(str::to_string);
        async move {
            controller
                .cached_image(url.as_deref())
                .await
                .map(crate::domain::ImageDownload::into_image)
        }
        .boxed()
    }

    /// Runs the cascading fetch, handing callbacks bare images.
    pub fn cascading_fetch<M, P>(
        &self,
        main_url: Option<&str>,
        placeholder_url: Option<&str>,
        mut on_main: M,
        mut on_placeholder: P,
    ) -> BoxFuture<'static, FetchResult<()>>
    where
        M: FnMut(Arc<image::DynamicImage>) + Send + 'static,
        P: FnMut(Arc<image::DynamicImage>) + Send + 'static,
    {
        let controller = self.controller.clone();
        let main_url = main_url.map(str::to_string);
        let placeholder_url = placeholder_url.map(str::to_string);
        async move {
            controller
                .cascading_fetch(
                    main_url.as_deref(),
                    placeholder_url.as_deref(),
                    |download| on_main(download.image),
                    |download| on_placeholder(download.image),
                )
                .await
        }
        .boxed()
    }
}
