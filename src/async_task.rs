use std::task::{Context, Poll, Waker};

use futures::{future::BoxFuture, FutureExt};

/// A future which is polled from the UI loop without blocking it.
/// The result stays available once the future completed.
pub enum AsyncRefTask<T> {
    Pending(BoxFuture<'static, T>),
    Ready(T),
}

impl<T> AsyncRefTask<T> {
    pub fn new(b: BoxFuture<'static, T>) -> Self {
        Self::Pending(b)
    }

    pub fn new_ready(r: T) -> Self {
        Self::Ready(r)
    }

    pub fn data(&mut self) -> Option<&mut T> {
        match self {
            AsyncRefTask::Pending(x) => {
                let mut cx = Context::from_waker(Waker::noop());
                match x.poll_unpin(&mut cx) {
                    Poll::Ready(r) => {
                        *self = Self::Ready(r);
                        let Self::Ready(x) = self else {
                            unreachable!("Assigned above")
                        };
                        Some(x)
                    }
                    Poll::Pending => None,
                }
            }
            AsyncRefTask::Ready(x) => Some(x),
        }
    }
}
