use std::sync::Arc;

use iox_time::TimeProvider;
use tokio::net::TcpListener;

use crate::{CommonServerState, Server, http::HttpApi, service::AssetService};

#[derive(Debug)]
pub struct ServerBuilder<A, T, L> {
    common_state: CommonServerState,
    assets: A,
    time_provider: T,
    listener: L,
}

impl ServerBuilder<NoAssets, NoTimeProvider, NoListener> {
    pub fn new(common_state: CommonServerState) -> Self {
        Self {
            common_state,
            assets: NoAssets,
            time_provider: NoTimeProvider,
            listener: NoListener,
        }
    }
}

#[derive(Debug)]
pub struct NoAssets;
#[derive(Debug)]
pub struct WithAssets(Arc<AssetService>);
#[derive(Debug)]
pub struct NoTimeProvider;
#[derive(Debug)]
pub struct WithTimeProvider<T>(Arc<T>);
#[derive(Debug)]
pub struct NoListener;
#[derive(Debug)]
pub struct WithListener(TcpListener);

impl<T, L> ServerBuilder<NoAssets, T, L> {
    pub fn assets(self, assets: Arc<AssetService>) -> ServerBuilder<WithAssets, T, L> {
        ServerBuilder {
            common_state: self.common_state,
            assets: WithAssets(assets),
            time_provider: self.time_provider,
            listener: self.listener,
        }
    }
}

impl<A, L> ServerBuilder<A, NoTimeProvider, L> {
    pub fn time_provider<T>(self, tp: Arc<T>) -> ServerBuilder<A, WithTimeProvider<T>, L> {
        ServerBuilder {
            common_state: self.common_state,
            assets: self.assets,
            time_provider: WithTimeProvider(tp),
            listener: self.listener,
        }
    }
}

impl<A, T> ServerBuilder<A, T, NoListener> {
    pub fn tcp_listener(self, listener: TcpListener) -> ServerBuilder<A, T, WithListener> {
        ServerBuilder {
            common_state: self.common_state,
            assets: self.assets,
            time_provider: self.time_provider,
            listener: WithListener(listener),
        }
    }
}

impl<T: TimeProvider> ServerBuilder<WithAssets, WithTimeProvider<T>, WithListener> {
    pub fn build(self) -> Server {
        let time_provider: Arc<dyn TimeProvider> = self.time_provider.0;
        let http = Arc::new(HttpApi::new(
            self.common_state.clone(),
            self.assets.0,
            time_provider,
        ));
        Server {
            common_state: self.common_state,
            http,
            listener: self.listener.0,
        }
    }
}
