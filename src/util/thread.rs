//! Module `thread` implement a generic multi-threading pattern.
//!
//! It is inspired from gen-server model from Erlang, where by, every thread is
//! expected to hold onto its own state, and handle all inter-thread communication
//! via channels and message queues.

use log::warn;

use std::{
    mem,
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Duration,
};

use crate::Result;

/// Thread type, providing gen-server pattern to do multi-threading.
///
/// NOTE: When a thread value is dropped, it is made sure that there are no dangling
/// thread routines. To achieve this following requirements need to be satisfied:
///
/// * The thread's main loop should handle _disconnect_ signal on its [Rx] channel.
/// * Call `join()` on the [Thread] instance.
pub struct Thread<Q, R = (), T = ()> {
    name: String,
    inner: Option<Inner<Q, R, T>>,
}

struct Inner<Q, R, T> {
    handle: thread::JoinHandle<T>,
    tx: Option<Arc<Mutex<Tx<Q, R>>>>,
}

impl<Q, R, T> Inner<Q, R, T> {
    fn join(mut self) -> Result<T> {
        mem::drop(self.tx.take());

        match self.handle.join() {
            Ok(val) => Ok(val),
            Err(err) => err_at!(ThreadFail, msg: "fail {:?}", err),
        }
    }
}

impl<Q, R, T> Drop for Thread<Q, R, T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.join().ok();
        }
    }
}

impl<Q, R, T> Thread<Q, R, T> {
    /// Create a new Thread instance, using asynchronous channel with infinite buffer.
    /// `main_loop` shall be called with the rx side of the channel and shall return
    /// a function that can be spawned using thread::spawn.
    pub fn new<F, N>(name: &str, main_loop: F) -> Result<Thread<Q, R, T>>
    where
        F: 'static + FnOnce(Rx<Q, R>) -> N + Send,
        N: 'static + Send + FnOnce() -> T,
        T: 'static + Send,
    {
        let (tx, rx) = mpsc::channel();
        let handle = err_at!(
            ThreadFail,
            thread::Builder::new().name(name.to_string()).spawn(main_loop(rx)),
            "spawn {}",
            name
        )?;

        let tx = Some(Arc::new(Mutex::new(Tx { tx })));

        Ok(Thread {
            name: name.to_string(),
            inner: Some(Inner { handle, tx }),
        })
    }

    /// Recommended way to exit/shutdown the thread. Note that all [Tx] clones of this
    /// thread must also be dropped for this call to return.
    ///
    /// Even otherwise, when Thread value goes out of scope its drop implementation
    /// shall call this method to exit the thread, except that any errors are ignored.
    pub fn join(mut self) -> Result<T> {
        match self.inner.take() {
            Some(inner) => inner.join(),
            None => err_at!(ThreadFail, msg: "thread {} already joined", self.name),
        }
    }

    /// Return name of this thread.
    pub fn to_name(&self) -> String {
        self.name.to_string()
    }

    /// Return a clone of tx channel.
    pub fn to_tx(&self) -> Result<Tx<Q, R>> {
        let tx = self.inner.as_ref().and_then(|inner| inner.tx.as_ref());
        match tx {
            Some(tx) => match tx.lock() {
                Ok(tx) => Ok(tx.clone()),
                Err(err) => err_at!(IPCFail, msg: "poisoned tx {}", err),
            },
            None => err_at!(IPCFail, msg: "thread {} closed", self.name),
        }
    }
}

/// IPC type, wrapping the [mpsc::Sender] side of a thread's channel.
///
/// The clone behavior is similar to [mpsc::Sender].
pub struct Tx<Q, R = ()> {
    tx: mpsc::Sender<(Q, Option<mpsc::Sender<R>>)>,
}

impl<Q, R> Clone for Tx<Q, R> {
    fn clone(&self) -> Self {
        Tx {
            tx: self.tx.clone(),
        }
    }
}

impl<Q, R> Tx<Q, R> {
    /// Send a request message to thread, response shall be sent on `rt_tx`.
    pub fn request_tx(&self, request: Q, rt_tx: mpsc::Sender<R>) -> Result<()> {
        err_at!(IPCFail, self.tx.send((request, Some(rt_tx))))
    }
}

/// IPC type, that shall be passed to the thread's main loop.
///
/// Refer to [Thread::new] for details.
pub type Rx<Q, R = ()> = mpsc::Receiver<(Q, Option<mpsc::Sender<R>>)>;

/// Create a pool of threads of same type.
///
/// That is, the thread's main-loop takes the same Request type and return the same
/// Response type. Load balancing across the threads are handled in random fashion.
pub struct Pool<Q, R = (), T = ()> {
    name: String,
    threads: Vec<Thread<Q, R, T>>,
    pool_size: usize,
}

impl<Q, R, T> Pool<Q, R, T> {
    /// Create a new pool, number of threads in this pool shall default to number of cores.
    pub fn new(name: &str) -> Pool<Q, R, T> {
        Pool {
            name: name.to_string(),
            threads: Vec::default(),
            pool_size: num_cpus::get(),
        }
    }

    pub fn set_pool_size(&mut self, pool_size: usize) -> &mut Self {
        self.pool_size = std::cmp::max(pool_size, 1);
        self
    }

    /// Spawn all the threads configured for this pool.
    pub fn spawn<F, N>(&mut self, main_loop: F) -> Result<()>
    where
        F: 'static + FnOnce(Rx<Q, R>) -> N + Send + Clone,
        N: 'static + Send + FnOnce() -> T,
        T: 'static + Send,
    {
        for i in 0..self.pool_size {
            let (name, main_loop) = (format!("{}-{}", self.name, i), main_loop.clone());
            self.threads.push(Thread::new(&name, main_loop)?)
        }
        Ok(())
    }

    /// Shutdown all threads, wait for them to exit and cleanup this pool.
    pub fn close_wait(self) -> Result<Vec<T>> {
        let mut results = vec![];
        for th in self.threads.into_iter() {
            results.push(th.join()?)
        }
        Ok(results)
    }

    /// Shutdown all threads and wait for them to exit, but not beyond
    /// `grace`. Threads still running after `grace` are abandoned, they
    /// shall exit on their own once their pending message is handled.
    ///
    /// Return true if all threads exited within `grace`.
    pub fn close_timeout(self, grace: Duration) -> bool
    where
        Q: 'static + Send,
        R: 'static + Send,
        T: 'static + Send,
    {
        let name = self.name.clone();
        let (tx, rx) = mpsc::channel();
        let res = thread::Builder::new()
            .name(format!("{}-closer", name))
            .spawn(move || tx.send(self.close_wait().is_ok()).ok());

        match res {
            Ok(_) => match rx.recv_timeout(grace) {
                Ok(ok) => ok,
                Err(_) => {
                    warn!(target: "thread", "pool {} abandoned after {:?}", name, grace);
                    false
                }
            },
            Err(err) => {
                warn!(target: "thread", "pool {} closer {}", name, err);
                false
            }
        }
    }
}

impl<Q, R, T> Pool<Q, R, T> {
    /// Return the number of threads in this pool.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Send a request message to thread, response shall be sent on `rt_tx`.
    pub fn request_tx(&self, request: Q, rt_tx: mpsc::Sender<R>) -> Result<()> {
        self.pick()?.to_tx()?.request_tx(request, rt_tx)
    }

    fn pick(&self) -> Result<&Thread<Q, R, T>> {
        match self.threads.len() {
            0 => err_at!(IPCFail, msg: "pool {} has no threads", self.name),
            n => Ok(&self.threads[rand::random::<usize>() % n]),
        }
    }
}

#[cfg(test)]
#[path = "thread_test.rs"]
mod thread_test;
