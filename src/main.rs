use stress_test::{stress_test_convergence, stress_test_scaling, stress_test_trimmed};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async_main());
}

async fn async_main() {

    // Run async stress tests
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ASYNC STRESS TESTS                               ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: small scale
    let stats = stress_test_convergence(4, 100, 200, 1).await;
    stats.print();

    // Test 2: medium scale
    let stats = stress_test_convergence(10, 200, 1000, 2).await;
    stats.print();

    // Test 3: bounded logs
    stress_test_trimmed(4, 200, 64).await;

    // Test 4: Scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(12, 4).await;

    println!("\n✓ All stress tests completed successfully!");
}
