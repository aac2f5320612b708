use clap::Parser;
use mock_backend::Server;

#[derive(Parser, Debug)]
#[command(name = "mock-backend", about = "Demo HTTP backend for the load balancer")]
struct Args {
	/// Port to listen on
	#[arg(short, long, default_value_t = 8081)]
	port: u16,

	/// Server name reported in X-Backend-Server (defaults to backend-<port>)
	#[arg(long)]
	name: Option<String>,
}

#[tokio::main]
async fn main() {
	let args = Args::parse();
	let server = match args.name {
		Some(name) => Server::run_named(&name, args.port).await,
		None => Server::run_with_port(args.port).await,
	};
	println!("backend listening on {}", server.address());
	server.wait_for_shutdown().await;
}
