use parking_lot::RwLock;
use std::sync::Arc;
use uplink_core::transport::{RequestOptions, TransportResponse};

use super::error::RouterError;

/// 出站请求拦截器
///
/// 接收累积的请求选项并返回（可能被修改的）新值。
/// 不修改时需显式原样返回，返回 `Err` 会立即中止整条链。
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, options: RequestOptions) -> Result<RequestOptions, RouterError>;
}

impl<F> RequestInterceptor for F
where
    F: Fn(RequestOptions) -> Result<RequestOptions, RouterError> + Send + Sync,
{
    fn intercept(&self, options: RequestOptions) -> Result<RequestOptions, RouterError> {
        self(options)
    }
}

/// 响应拦截器，语义与请求拦截器一致
pub trait ResponseInterceptor: Send + Sync {
    fn intercept(&self, response: TransportResponse) -> Result<TransportResponse, RouterError>;
}

impl<F> ResponseInterceptor for F
where
    F: Fn(TransportResponse) -> Result<TransportResponse, RouterError> + Send + Sync,
{
    fn intercept(&self, response: TransportResponse) -> Result<TransportResponse, RouterError> {
        self(response)
    }
}

/// 错误拦截器
///
/// 对将要向调用方传播的错误做不可失败的改写，
/// 想替换错误时直接返回替换值即可。
pub trait ErrorInterceptor: Send + Sync {
    fn transform(&self, error: RouterError) -> RouterError;
}

impl<F> ErrorInterceptor for F
where
    F: Fn(RouterError) -> RouterError + Send + Sync,
{
    fn transform(&self, error: RouterError) -> RouterError {
        self(error)
    }
}

/// 拦截器链
///
/// 三条独立的有序列表，按注册顺序从左到右应用。
/// 注册和应用都不跨越 await 点，应用前先克隆当前列表，
/// 因此链在执行过程中被并发修改不会影响本次执行。
#[derive(Default)]
pub struct InterceptorChain {
    request: RwLock<Vec<Arc<dyn RequestInterceptor>>>,
    response: RwLock<Vec<Arc<dyn ResponseInterceptor>>>,
    error: RwLock<Vec<Arc<dyn ErrorInterceptor>>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册请求拦截器，追加到链尾
    pub fn add_request<I: RequestInterceptor + 'static>(&self, interceptor: I) {
        self.request.write().push(Arc::new(interceptor));
    }

    /// 注册响应拦截器，追加到链尾
    pub fn add_response<I: ResponseInterceptor + 'static>(&self, interceptor: I) {
        self.response.write().push(Arc::new(interceptor));
    }

    /// 注册错误拦截器，追加到链尾
    pub fn add_error<I: ErrorInterceptor + 'static>(&self, interceptor: I) {
        self.error.write().push(Arc::new(interceptor));
    }

    /// 依次应用请求拦截器
    ///
    /// 任意一个返回 `Err` 即中止，该错误原样向外传播。
    pub fn apply_request(&self, options: RequestOptions) -> Result<RequestOptions, RouterError> {
        let chain: Vec<_> = self.request.read().iter().cloned().collect();
        let mut current = options;
        for interceptor in chain {
            current = interceptor.intercept(current)?;
        }
        Ok(current)
    }

    /// 依次应用响应拦截器
    pub fn apply_response(
        &self,
        response: TransportResponse,
    ) -> Result<TransportResponse, RouterError> {
        let chain: Vec<_> = self.response.read().iter().cloned().collect();
        let mut current = response;
        for interceptor in chain {
            current = interceptor.intercept(current)?;
        }
        Ok(current)
    }

    /// 依次应用错误拦截器，整条链必然走完
    pub fn apply_error(&self, error: RouterError) -> RouterError {
        let chain: Vec<_> = self.error.read().iter().cloned().collect();
        let mut current = error;
        for interceptor in chain {
            current = interceptor.transform(current);
        }
        current
    }
}
