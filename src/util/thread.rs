//! Module `thread` implement a gen-server style multi-threading pattern.
//!
//! Every thread owns its state and all inter-thread communication goes
//! over channels. A caller posts a request along with an optional reply
//! channel; the reply channel doubles as the completion signal, so a
//! caller awaiting an asynchronous operation simply blocks on the
//! receiver it got back.

use std::{
    mem,
    sync::{atomic::AtomicUsize, atomic::Ordering::SeqCst, mpsc, Arc, Mutex},
    thread,
};

use crate::{Error, Result};

/// Receiver side of a [Thread]'s input channel, handed to its main loop.
///
/// Each message is the request paired with an optional reply channel.
/// The main loop must treat channel-disconnect as the shutdown signal.
pub type Rx<Q, R = ()> = mpsc::Receiver<(Q, Option<mpsc::Sender<R>>)>;

/// Sender handle into a [Thread]. Cheap to clone.
pub struct Tx<Q, R = ()>(mpsc::Sender<(Q, Option<mpsc::Sender<R>>)>);

impl<Q, R> Clone for Tx<Q, R> {
    fn clone(&self) -> Self {
        Tx(self.0.clone())
    }
}

impl<Q, R> Tx<Q, R> {
    /// Post a message, do not wait for a response.
    pub fn post(&self, msg: Q) -> Result<()> {
        err_at!(IPCFail, self.0.send((msg, None)))
    }

    /// Send a request and block for the response.
    pub fn request(&self, request: Q) -> Result<R> {
        let (tx, rx) = mpsc::channel();
        err_at!(IPCFail, self.0.send((request, Some(tx))))?;
        err_at!(IPCFail, rx.recv())
    }

    /// Send a request, response shall be delivered on `reply_tx`. Callers
    /// typically gather several receivers and drain them in turn.
    pub fn request_tx(&self, request: Q, reply_tx: mpsc::Sender<R>) -> Result<()> {
        err_at!(IPCFail, self.0.send((request, Some(reply_tx))))
    }
}

/// Thread type, holding a join-handle and the sending side of its input
/// channel.
///
/// When dropped, the input channel is closed and the thread joined.
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
    /// Spawn a new thread. `main_loop` is called with the receiving side
    /// of the input channel and must return the closure to run.
    pub fn new<F, N>(name: &str, main_loop: F) -> Thread<Q, R, T>
    where
        F: 'static + FnOnce(Rx<Q, R>) -> N + Send,
        N: 'static + Send + FnOnce() -> T,
        T: 'static + Send,
    {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(main_loop(rx));

        Thread {
            name: name.to_string(),
            inner: Some(Inner {
                handle,
                tx: Some(Arc::new(Mutex::new(Tx(tx)))),
            }),
        }
    }

    /// Close the input channel, wait for the thread to exit.
    pub fn join(mut self) -> Result<T> {
        self.inner.take().unwrap().join()
    }

    pub fn to_name(&self) -> String {
        self.name.to_string()
    }

    /// Return a clone of the input channel's sender side.
    pub fn to_tx(&self) -> Tx<Q, R> {
        match self.inner.as_ref() {
            Some(inner) => inner.tx.as_ref().unwrap().lock().unwrap().clone(),
            None => unreachable!(),
        }
    }
}

/// A fixed-size pool of identical [Thread]s, requests handed out
/// round-robin.
pub struct Pool<Q, R = (), T = ()> {
    name: String,
    threads: Vec<Thread<Q, R, T>>,
    robin: AtomicUsize,
}

impl<Q, R, T> Pool<Q, R, T> {
    /// Spawn `pool_size` threads, each running `main_loop`.
    pub fn new_spawned<F, N>(name: &str, pool_size: usize, main_loop: F) -> Result<Pool<Q, R, T>>
    where
        F: 'static + FnOnce(Rx<Q, R>) -> N + Send + Clone,
        N: 'static + Send + FnOnce() -> T,
        T: 'static + Send,
    {
        if pool_size == 0 {
            err_at!(InvalidInput, msg: "pool {:?} needs at least one thread", name)?;
        }

        let threads: Vec<Thread<Q, R, T>> = (0..pool_size)
            .map(|i| Thread::new(&format!("{}-{}", name, i), main_loop.clone()))
            .collect();

        Ok(Pool {
            name: name.to_string(),
            threads,
            robin: AtomicUsize::new(0),
        })
    }

    pub fn to_name(&self) -> String {
        self.name.to_string()
    }

    pub fn pool_size(&self) -> usize {
        self.threads.len()
    }

    /// Send a request to the next thread in line, response shall be
    /// delivered on `reply_tx`.
    pub fn request_tx(&self, request: Q, reply_tx: mpsc::Sender<R>) -> Result<()> {
        let n = self.robin.fetch_add(1, SeqCst) % self.threads.len();
        self.threads[n].to_tx().request_tx(request, reply_tx)
    }

    /// Shutdown all threads, wait for each to exit.
    pub fn close_wait(self) -> Result<Vec<T>> {
        let mut results = vec![];
        for th in self.threads.into_iter() {
            results.push(th.join()?);
        }
        Ok(results)
    }
}
